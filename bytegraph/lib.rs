//! bytegraph - nested object graphs inside a single transferable byte buffer
//!
//! An `ObjectBuffer` stores objects, arrays, strings, numbers, booleans and
//! wide integers in one pre-allocated buffer with no native pointers, only
//! self-relative offsets, so the whole graph can be handed between execution
//! contexts as plain bytes. Storage, layout and reclamation are implemented by
//! the `bytegraph_heap` core; this crate adds the property-level API, the
//! wrapper-handle registry, and the disposal protocol.

mod cache;
mod object_buffer;

pub use bytegraph_heap::{
    AllocatorStats, CarrierOptions, CarrierOptionsBuilder, HeapError, HeapResult, MapKey,
    OwnedMapKey, ScalarValue, TextCodec, Utf8Codec,
};
pub use object_buffer::{
    ArrayRef, ObjectBuffer, ObjectBufferBuilder, ObjectRef, PropertyValue, WrapperHandle,
    DEFAULT_BUFFER_SIZE,
};
