//! Object buffer wrapper
//!
//! `ObjectBuffer` is the collaborator-facing handle over a carrier: property
//! reads and writes go through the heap hashmap and entry codec, and releasing
//! a handle runs the disposal protocol (destroy the refcount, then walk the
//! reference graph, free the leaves and decrement the arcs).

use num_bigint::BigInt;

use bytegraph_heap::{
    create_array_entry, create_object_entry, decrement_ref_count_with_num, destroy_entry,
    get_all_linked_addresses, hashmap, increment_ref_count, object_map_address, read_entry,
    read_tag, wide_int_fits, write_scalar, AllocatorStats, Carrier, CarrierOptions,
    CarrierOptionsBuilder, EntryValue, HeapAddr, HeapError, HeapResult, MapKey, OwnedMapKey,
    ScalarValue, TextCodec, NULL_PTR,
};

use crate::cache;

/// Default backing buffer size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Reference to an Object entry inside a buffer. Plain navigation token; it
/// holds no counted reference of its own (see `wrap_ref` for that).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    pub(crate) address: HeapAddr,
}

impl ObjectRef {
    /// Heap address of the referenced entry
    pub fn address(&self) -> HeapAddr {
        self.address
    }
}

/// Reference to an Array entry inside a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrayRef {
    pub(crate) address: HeapAddr,
}

impl ArrayRef {
    pub fn address(&self) -> HeapAddr {
        self.address
    }
}

/// A counted wrapper handle over a heap entry, registered in the process-wide
/// cache. Disposing it twice is detected as use-after-free.
#[derive(Debug)]
pub struct WrapperHandle {
    carrier_id: u64,
    address: HeapAddr,
}

/// A decoded property value
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    WideInt(BigInt),
    Date(f64),
    Object(ObjectRef),
    Array(ArrayRef),
}

pub struct ObjectBufferBuilder {
    buffer_size: usize,
    options: CarrierOptionsBuilder,
}

impl ObjectBufferBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        ObjectBufferBuilder {
            buffer_size: DEFAULT_BUFFER_SIZE,
            options: CarrierOptionsBuilder::new(),
        }
    }

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn array_additional_allocation(mut self, slots: u32) -> Self {
        self.options = self.options.array_additional_allocation(slots);
        self
    }

    pub fn hash_map_capacity(mut self, capacity: u32) -> Self {
        self.options = self.options.hash_map_capacity(capacity);
        self
    }

    pub fn text_codec(mut self, codec: Box<dyn TextCodec>) -> Self {
        self.options = self.options.text_codec(codec);
        self
    }

    /// Build the buffer: allocate the carrier, materialize the root Object
    /// entry (refcount 1, owned by the returned handle) and record it in the
    /// buffer header.
    pub fn build(self) -> HeapResult<ObjectBuffer> {
        let mut carrier = Carrier::new(self.buffer_size, self.options.build());
        let root = create_object_entry(&mut carrier)?;
        carrier.heap.set_root_entry(root);

        let carrier_id = cache::next_carrier_id();
        cache::register(carrier_id, root);

        Ok(ObjectBuffer { carrier, carrier_id, root: ObjectRef { address: root } })
    }
}

/// The wrapper over one heap buffer
pub struct ObjectBuffer {
    carrier: Carrier,
    carrier_id: u64,
    root: ObjectRef,
}

impl ObjectBuffer {
    /// The root object
    pub fn root(&self) -> ObjectRef {
        self.root
    }

    /// The underlying carrier, for diagnostics and low-level access
    pub fn carrier(&self) -> &Carrier {
        &self.carrier
    }

    /// Allocator statistics for this buffer
    pub fn memory_stats(&self) -> AllocatorStats {
        self.carrier.allocator.stats()
    }

    /// Write a scalar property.
    ///
    /// A wide integer whose magnitude exceeds 64 bits is dropped quietly: the
    /// property becomes (or remains) absent and no memory is consumed for the
    /// rejected value. Every other failure propagates.
    pub fn set(
        &mut self,
        target: ObjectRef,
        key: MapKey<'_>,
        value: &ScalarValue<'_>,
    ) -> HeapResult<()> {
        if let ScalarValue::WideInt(wide) = value {
            if !wide_int_fits(wide) {
                self.delete(target, key)?;
                return Ok(());
            }
        }

        let map = object_map_address(&self.carrier.heap, target.address)?;
        // Encode the value first: if the slot insert fails the old property
        // (or its absence) is preserved.
        let entry = write_scalar(&mut self.carrier, value)?;
        let slot = match hashmap::insert_or_update(&mut self.carrier, map, key) {
            Ok(slot) => slot,
            Err(err) => {
                release_value(&mut self.carrier, entry)?;
                return Err(err);
            }
        };

        let old = self.carrier.heap.read_u32(slot);
        self.carrier.heap.write_u32(slot, entry);
        if old != NULL_PTR {
            release_value(&mut self.carrier, old)?;
        }
        Ok(())
    }

    /// Store a second reference to an existing object under `key`, bumping its
    /// refcount. This is how substructure sharing is expressed.
    pub fn share_object(
        &mut self,
        target: ObjectRef,
        key: MapKey<'_>,
        child: ObjectRef,
    ) -> HeapResult<()> {
        let map = object_map_address(&self.carrier.heap, target.address)?;
        let slot = hashmap::insert_or_update(&mut self.carrier, map, key)?;
        increment_ref_count(&mut self.carrier.heap, child.address)?;

        let old = self.carrier.heap.read_u32(slot);
        self.carrier.heap.write_u32(slot, child.address);
        if old != NULL_PTR {
            release_value(&mut self.carrier, old)?;
        }
        Ok(())
    }

    /// Create an empty nested object under `key`
    pub fn create_object(&mut self, target: ObjectRef, key: MapKey<'_>) -> HeapResult<ObjectRef> {
        let map = object_map_address(&self.carrier.heap, target.address)?;
        let child = create_object_entry(&mut self.carrier)?;
        let slot = match hashmap::insert_or_update(&mut self.carrier, map, key) {
            Ok(slot) => slot,
            Err(err) => {
                decrement_ref_count_with_num(&mut self.carrier, child, 1)?;
                return Err(err);
            }
        };

        let old = self.carrier.heap.read_u32(slot);
        self.carrier.heap.write_u32(slot, child);
        if old != NULL_PTR {
            release_value(&mut self.carrier, old)?;
        }
        Ok(ObjectRef { address: child })
    }

    /// Create an empty nested array under `key`
    pub fn create_array(&mut self, target: ObjectRef, key: MapKey<'_>) -> HeapResult<ArrayRef> {
        let map = object_map_address(&self.carrier.heap, target.address)?;
        let capacity = self.carrier.options.array_additional_allocation;
        let child = create_array_entry(&mut self.carrier, capacity)?;
        let slot = match hashmap::insert_or_update(&mut self.carrier, map, key) {
            Ok(slot) => slot,
            Err(err) => {
                decrement_ref_count_with_num(&mut self.carrier, child, 1)?;
                return Err(err);
            }
        };

        let old = self.carrier.heap.read_u32(slot);
        self.carrier.heap.write_u32(slot, child);
        if old != NULL_PTR {
            release_value(&mut self.carrier, old)?;
        }
        Ok(ArrayRef { address: child })
    }

    /// Append a scalar element to an array
    pub fn push(&mut self, array: ArrayRef, value: &ScalarValue<'_>) -> HeapResult<()> {
        if let ScalarValue::WideInt(wide) = value {
            if !wide_int_fits(wide) {
                return Ok(());
            }
        }
        let entry = write_scalar(&mut self.carrier, value)?;
        let slot = match bytegraph_heap::array_push_slot(&mut self.carrier, array.address) {
            Ok(slot) => slot,
            Err(err) => {
                release_value(&mut self.carrier, entry)?;
                return Err(err);
            }
        };
        self.carrier.heap.write_u32(slot, entry);
        Ok(())
    }

    /// Element count of an array
    pub fn array_len(&self, array: ArrayRef) -> HeapResult<u32> {
        bytegraph_heap::array_length(&self.carrier.heap, array.address)
    }

    /// Decode element `index` of an array
    pub fn element(&self, array: ArrayRef, index: u32) -> HeapResult<Option<PropertyValue>> {
        let slot = bytegraph_heap::array_element_slot(&self.carrier.heap, array.address, index)?;
        self.decode_slot(slot)
    }

    /// Decode the property stored under `key`, or `None` when absent
    pub fn get(&self, target: ObjectRef, key: MapKey<'_>) -> HeapResult<Option<PropertyValue>> {
        let map = object_map_address(&self.carrier.heap, target.address)?;
        let slot = hashmap::value_lookup(&self.carrier.heap, map, key);
        if slot == NULL_PTR {
            return Ok(None);
        }
        self.decode_slot(slot)
    }

    /// Remove the property stored under `key`, releasing its value by the
    /// leaf/arc rule. Returns whether a key was removed.
    pub fn delete(&mut self, target: ObjectRef, key: MapKey<'_>) -> HeapResult<bool> {
        let map = object_map_address(&self.carrier.heap, target.address)?;
        let slot = hashmap::value_lookup(&self.carrier.heap, map, key);
        if slot == NULL_PTR {
            return Ok(false);
        }

        let entry = self.carrier.heap.read_u32(slot);
        if entry != NULL_PTR {
            release_value(&mut self.carrier, entry)?;
        }
        Ok(hashmap::delete(&mut self.carrier, map, key))
    }

    /// Number of properties on an object
    pub fn len(&self, target: ObjectRef) -> HeapResult<u32> {
        let map = object_map_address(&self.carrier.heap, target.address)?;
        Ok(hashmap::size(&self.carrier.heap, map))
    }

    /// Decoded keys of an object, in bucket-then-chain order
    pub fn keys(&self, target: ObjectRef) -> HeapResult<Vec<OwnedMapKey>> {
        let map = object_map_address(&self.carrier.heap, target.address)?;
        let mut keys = Vec::new();
        let mut cursor = hashmap::low_level_iterator(&self.carrier.heap, map, NULL_PTR);
        while cursor != NULL_PTR {
            let node = hashmap::node_key_value(&self.carrier.heap, cursor);
            keys.push(hashmap::read_map_key(&self.carrier.heap, node.key)?);
            cursor = hashmap::low_level_iterator(&self.carrier.heap, map, cursor);
        }
        Ok(keys)
    }

    /// Take a counted wrapper handle over a nested object.
    ///
    /// The same heap entry is never counted twice: wrapping an already-wrapped
    /// entry reuses the existing registration.
    pub fn wrap_ref(&mut self, target: ObjectRef) -> HeapResult<WrapperHandle> {
        if cache::register(self.carrier_id, target.address) {
            increment_ref_count(&mut self.carrier.heap, target.address)?;
        }
        Ok(WrapperHandle { carrier_id: self.carrier_id, address: target.address })
    }

    /// Release a wrapper handle and reclaim memory when it held the last
    /// reference. Returns whether the entry was reclaimed.
    ///
    /// Disposing a handle whose registration is already gone fails with
    /// `UseAfterFree` and touches nothing.
    pub fn dispose(&mut self, handle: WrapperHandle) -> HeapResult<bool> {
        if handle.carrier_id != self.carrier_id || !cache::remove(handle.carrier_id, handle.address)
        {
            return Err(HeapError::UseAfterFree);
        }
        self.destroy_and_reclaim(handle.address)
    }

    /// Release the root handle, reclaim the graph if nothing else shares it,
    /// and forget every wrapper registration of this buffer.
    pub fn close(mut self) -> HeapResult<bool> {
        let root = self.root.address;
        if !cache::remove(self.carrier_id, root) {
            return Err(HeapError::UseAfterFree);
        }
        let reclaimed = self.destroy_and_reclaim(root)?;
        cache::clear_carrier(self.carrier_id);
        Ok(reclaimed)
    }

    /// Detach the buffer for transfer to another context. The root's handle
    /// reference travels with the bytes; wrapper registrations do not.
    pub fn into_bytes(self) -> Box<[u8]> {
        cache::clear_carrier(self.carrier_id);
        self.carrier.into_bytes()
    }

    /// Reattach a buffer previously detached with `into_bytes`
    pub fn from_bytes(bytes: Box<[u8]>, options: CarrierOptions) -> HeapResult<ObjectBuffer> {
        let carrier = Carrier::from_bytes(bytes, options)?;
        let root = carrier.heap.root_entry();
        if root == NULL_PTR {
            return Err(HeapError::CorruptEntry { address: 0, tag: 0 });
        }
        // Must decode as an object before we hand out a root reference
        object_map_address(&carrier.heap, root)?;

        let carrier_id = cache::next_carrier_id();
        cache::register(carrier_id, root);
        Ok(ObjectBuffer { carrier, carrier_id, root: ObjectRef { address: root } })
    }

    /// The disposal protocol: drop one handle reference; on zero, walk the
    /// graph, free every leaf and decrement every arc by its reach count.
    fn destroy_and_reclaim(&mut self, address: HeapAddr) -> HeapResult<bool> {
        let remaining = destroy_entry(&mut self.carrier.heap, address)?;
        if remaining > 0 {
            return Ok(false);
        }

        let linked = get_all_linked_addresses(&self.carrier.heap, false, address)?;
        for &leaf in &linked.leaf_addresses {
            self.carrier.allocator.free(&self.carrier.heap, leaf);
        }
        for (&arc, &reached) in &linked.arc_addresses {
            decrement_ref_count_with_num(&mut self.carrier, arc, reached)?;
        }
        Ok(true)
    }

    fn decode_slot(&self, slot: HeapAddr) -> HeapResult<Option<PropertyValue>> {
        let entry = self.carrier.heap.read_u32(slot);
        if entry == NULL_PTR {
            return Ok(None);
        }
        let value = match read_entry(&self.carrier, entry)? {
            EntryValue::Undefined => PropertyValue::Undefined,
            EntryValue::Null => PropertyValue::Null,
            EntryValue::Boolean(value) => PropertyValue::Boolean(value),
            EntryValue::Number(value) => PropertyValue::Number(value),
            EntryValue::String(value) => PropertyValue::String(value),
            EntryValue::WideInt(value) => PropertyValue::WideInt(value),
            EntryValue::Date(value) => PropertyValue::Date(value),
            EntryValue::Object { .. } => PropertyValue::Object(ObjectRef { address: entry }),
            EntryValue::Array { .. } => PropertyValue::Array(ArrayRef { address: entry }),
        };
        Ok(Some(value))
    }
}

/// Release one reference to a value entry: arcs are decremented (cascading
/// when they hit zero), leaves are freed outright.
fn release_value(carrier: &mut Carrier, address: HeapAddr) -> HeapResult<()> {
    if read_tag(&carrier.heap, address)?.has_ref_count() {
        decrement_ref_count_with_num(carrier, address, 1)?;
    } else {
        let linked = get_all_linked_addresses(&carrier.heap, false, address)?;
        debug_assert!(linked.arc_addresses.is_empty());
        for &leaf in &linked.leaf_addresses {
            carrier.allocator.free(&carrier.heap, leaf);
        }
    }
    Ok(())
}
