//! Carrier - the bundle of heap, allocator, and configuration threaded
//! through every core operation.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::string::String;

use crate::{
    allocator::Allocator,
    error::HeapResult,
    heap::Heap,
};

/// Default bucket count for newly created hash maps
pub const DEFAULT_HASH_MAP_CAPACITY: u32 = 8;

/// Default extra element slots reserved on each array growth
pub const DEFAULT_ARRAY_ADDITIONAL_ALLOCATION: u32 = 0;

/// Encoder/decoder for string entry payloads.
///
/// Property keys are always hashed and stored as UTF-8 so two carriers with
/// different codecs still probe the same buckets; the codec only shapes how
/// string *values* are laid out in the buffer.
pub trait TextCodec {
    /// Encode a string into the bytes stored after the length prefix
    fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]>;

    /// Decode stored bytes back into a string, or `None` if the payload is
    /// not decodable (surfaced to callers as a corrupt entry)
    fn decode(&self, bytes: &[u8]) -> Option<String>;
}

/// Default codec: strings are stored as their UTF-8 bytes unchanged
pub struct Utf8Codec;

impl TextCodec for Utf8Codec {
    fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        Cow::Borrowed(text.as_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Option<String> {
        core::str::from_utf8(bytes).ok().map(String::from)
    }
}

/// Options passed throughout the core.
pub struct CarrierOptions {
    /// Extra element slots reserved each time an array grows
    pub array_additional_allocation: u32,

    /// Bucket count for newly created hash maps. Fixed for the life of each
    /// map; chains degrade instead of rehashing.
    pub hash_map_capacity: u32,

    /// Codec used for string entry payloads
    pub text_codec: Box<dyn TextCodec>,
}

impl Default for CarrierOptions {
    /// Create a new options struct with default values.
    fn default() -> Self {
        CarrierOptionsBuilder::new().build()
    }
}

pub struct CarrierOptionsBuilder(CarrierOptions);

impl CarrierOptionsBuilder {
    /// Create new options with default values.
    pub fn new() -> Self {
        Self(CarrierOptions {
            array_additional_allocation: DEFAULT_ARRAY_ADDITIONAL_ALLOCATION,
            hash_map_capacity: DEFAULT_HASH_MAP_CAPACITY,
            text_codec: Box::new(Utf8Codec),
        })
    }

    /// Return the options that have been built, consuming the builder.
    pub fn build(self) -> CarrierOptions {
        self.0
    }

    pub fn array_additional_allocation(mut self, slots: u32) -> Self {
        self.0.array_additional_allocation = slots;
        self
    }

    pub fn hash_map_capacity(mut self, capacity: u32) -> Self {
        debug_assert!(capacity > 0);
        self.0.hash_map_capacity = capacity.max(1);
        self
    }

    pub fn text_codec(mut self, codec: Box<dyn TextCodec>) -> Self {
        self.0.text_codec = codec;
        self
    }
}

/// The aggregate handle passed through every core operation
pub struct Carrier {
    pub heap: Heap,
    pub allocator: Allocator,
    pub options: CarrierOptions,
}

impl Carrier {
    /// Create a carrier over a fresh zeroed buffer of `heap_size` bytes
    pub fn new(heap_size: usize, options: CarrierOptions) -> Carrier {
        let heap = Heap::new(heap_size);
        let allocator = Allocator::for_heap(&heap);
        Carrier { heap, allocator, options }
    }

    /// Reattach to a buffer previously detached with `into_bytes`
    pub fn from_bytes(bytes: Box<[u8]>, options: CarrierOptions) -> HeapResult<Carrier> {
        let heap = Heap::from_bytes(bytes)?;
        let allocator = Allocator::reattach(&heap);
        Ok(Carrier { heap, allocator, options })
    }

    /// Detach the buffer for transfer, persisting allocator state into the
    /// buffer header first
    pub fn into_bytes(mut self) -> Box<[u8]> {
        let top = self.allocator.top();
        self.heap.save_top(top);
        self.heap.into_bytes()
    }
}
