//! bytegraph heap core
//!
//! The memory subsystem behind bytegraph: a fixed-capacity byte-addressable
//! heap that stores an arbitrary nested object graph (objects, arrays,
//! strings, numbers, booleans, wide integers) without any native pointers.
//! Every reference inside the buffer is a self-relative `u32` offset, so the
//! buffer can be handed to another execution context as plain bytes.
//!
//! Key types:
//! - `Heap`: the byte buffer plus width-typed accessors
//! - `Allocator`: bump allocation with a size-classed free registry
//! - `EntryTag` / `EntryValue`: the tagged value encoding
//! - `Carrier`: heap + allocator + configuration, threaded through every call
//!
//! Key operations:
//! - `hashmap::*`: the chained hash table backing every object's property map
//! - `get_all_linked_addresses`: the reference graph walker used at teardown
//! - `refcount::*`: the embedded refcount store and cascading release

#![no_std]
extern crate alloc;

mod allocator;
mod carrier;
mod entry;
mod error;
mod heap;
mod linked_addresses;
mod refcount;

pub mod hashmap;

pub use allocator::{Allocator, AllocatorStats, ALLOC_ALIGN};
pub use carrier::{Carrier, CarrierOptions, CarrierOptionsBuilder, TextCodec, Utf8Codec};
pub use entry::{
    array_capacity, array_element_slot, array_length, array_push_slot, create_array_entry,
    create_object_entry, object_map_address, read_entry, read_tag, wide_int_fits, write_scalar,
    EntryTag, EntryValue, ScalarValue,
};
pub use error::{HeapError, HeapResult};
pub use hashmap::{MapKey, OwnedMapKey};
pub use heap::{Heap, HeapAddr, HEAP_HEADER_BYTES, HEAP_LAYOUT_VERSION, HEAP_MAGIC, NULL_PTR};
pub use linked_addresses::{get_all_linked_addresses, LinkedAddresses};
pub use refcount::{
    decrement_ref_count, decrement_ref_count_with_num, destroy_entry, increment_ref_count,
    read_ref_count,
};

#[cfg(test)]
mod tests;
