//! Chained hash table built entirely out of heap addresses
//!
//! Backs every object's property map. Keys are strings or numbers; values are
//! 4-byte slots holding the address of a value entry (written by the caller).
//!
//! Layouts:
//!
//! ```text
//! map header | capacity: u32 | size: u32 | buckets: u32 |
//! buckets    | head node address: u32 | x capacity  (0 = empty bucket)
//! node       | hash: u32 | key entry: u32 | value slot: u32 | next node: u32 |
//! ```
//!
//! Collisions chain through `next`; new nodes are prepended to their bucket.
//! Capacity is fixed at creation and the table never rehashes, so sustained
//! growth degrades lookups to linear scans of long chains. That tradeoff is
//! intentional and must not be papered over with silent resizing.
//!
//! Key entries are Number or String entries owned by their node. Key strings
//! are always stored as UTF-8, independent of the carrier's text codec, so
//! hashing and probing need no codec at all.

use alloc::string::String;
use alloc::vec::Vec;

use crate::{
    carrier::Carrier,
    entry::{EntryTag, STRING_LENGTH_OFFSET, STRING_PAYLOAD_OFFSET},
    error::{HeapError, HeapResult},
    heap::{Heap, HeapAddr, NULL_PTR},
};

const MAP_CAPACITY_OFFSET: u32 = 0;
const MAP_SIZE_OFFSET: u32 = 4;
const MAP_BUCKETS_OFFSET: u32 = 8;
const MAP_HEADER_BYTES: u32 = 12;

const NODE_HASH_OFFSET: u32 = 0;
const NODE_KEY_OFFSET: u32 = 4;
const NODE_VALUE_OFFSET: u32 = 8;
const NODE_NEXT_OFFSET: u32 = 12;
const NODE_BYTES: u32 = 16;

const BUCKET_SLOT_BYTES: u32 = 4;

const NUMBER_KEY_BYTES: u32 = 9;

/// A probe key for hash map operations
#[derive(Clone, Copy, Debug)]
pub enum MapKey<'a> {
    String(&'a str),
    Number(f64),
}

impl<'a> MapKey<'a> {
    /// 31-multiplier rolling hash over the key's byte representation
    pub fn hash(&self) -> u32 {
        match self {
            MapKey::String(text) => hash_bytes(text.as_bytes()),
            MapKey::Number(value) => hash_bytes(&value.to_le_bytes()),
        }
    }
}

impl<'a> From<&'a str> for MapKey<'a> {
    fn from(text: &'a str) -> MapKey<'a> {
        MapKey::String(text)
    }
}

impl From<f64> for MapKey<'static> {
    fn from(value: f64) -> MapKey<'static> {
        MapKey::Number(value)
    }
}

/// A key decoded back out of a node's key entry
#[derive(Clone, Debug, PartialEq)]
pub enum OwnedMapKey {
    String(String),
    Number(f64),
}

/// `h = 31 * h + byte` over wrapping 32-bit signed arithmetic, folded to its
/// absolute value
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut h: i32 = 0;
    for &byte in bytes {
        h = h.wrapping_mul(31).wrapping_add(byte as i32);
    }
    h.unsigned_abs()
}

/// Allocate an empty map: header plus a zeroed buckets array.
///
/// `capacity` is the bucket count for the life of the map.
pub fn create_hash_map(carrier: &mut Carrier, capacity: u32) -> HeapResult<HeapAddr> {
    debug_assert!(capacity > 0);
    let capacity = capacity.max(1);

    let map = carrier.allocator.alloc(&mut carrier.heap, MAP_HEADER_BYTES)?;
    let buckets = match carrier.allocator.alloc(&mut carrier.heap, capacity * BUCKET_SLOT_BYTES) {
        Ok(buckets) => buckets,
        Err(err) => {
            carrier.allocator.free(&carrier.heap, map);
            return Err(err);
        }
    };
    carrier.heap.zero(buckets, capacity * BUCKET_SLOT_BYTES);

    carrier.heap.write_u32(map + MAP_CAPACITY_OFFSET, capacity);
    carrier.heap.write_u32(map + MAP_SIZE_OFFSET, 0);
    carrier.heap.write_u32(map + MAP_BUCKETS_OFFSET, buckets);
    Ok(map)
}

/// Free the storage of a map that never received an insert. Rollback path for
/// object creation that fails partway.
pub(crate) fn free_empty_hash_map(carrier: &mut Carrier, map: HeapAddr) {
    let buckets = carrier.heap.read_u32(map + MAP_BUCKETS_OFFSET);
    carrier.allocator.free(&carrier.heap, buckets);
    carrier.allocator.free(&carrier.heap, map);
}

/// Locate the value slot for `key`, inserting a node if the key is new.
///
/// An existing key returns its current slot unchanged, with no allocation; the
/// caller overwrites the slot in place. A new key allocates its key entry and
/// node, prepends the node to its bucket, and returns the zeroed slot. If the
/// node allocation fails the key entry is released again and the map is left
/// untouched.
pub fn insert_or_update(
    carrier: &mut Carrier,
    map: HeapAddr,
    key: MapKey<'_>,
) -> HeapResult<HeapAddr> {
    let hash = key.hash();
    let found = find_node(&carrier.heap, map, key, hash);
    if found.node != NULL_PTR {
        return Ok(found.node + NODE_VALUE_OFFSET);
    }

    let key_entry = write_key_entry(carrier, key)?;
    let node = match carrier.allocator.alloc(&mut carrier.heap, NODE_BYTES) {
        Ok(node) => node,
        Err(err) => {
            carrier.allocator.free(&carrier.heap, key_entry);
            return Err(err);
        }
    };

    let bucket_slot = bucket_slot(&carrier.heap, map, hash);
    let head = carrier.heap.read_u32(bucket_slot);
    carrier.heap.write_u32(node + NODE_HASH_OFFSET, hash);
    carrier.heap.write_u32(node + NODE_KEY_OFFSET, key_entry);
    carrier.heap.write_u32(node + NODE_VALUE_OFFSET, NULL_PTR);
    carrier.heap.write_u32(node + NODE_NEXT_OFFSET, head);
    carrier.heap.write_u32(bucket_slot, node);

    let size = carrier.heap.read_u32(map + MAP_SIZE_OFFSET);
    carrier.heap.write_u32(map + MAP_SIZE_OFFSET, size + 1);

    Ok(node + NODE_VALUE_OFFSET)
}

/// Address of the value slot for `key`, or 0 when the key is absent
pub fn value_lookup(heap: &Heap, map: HeapAddr, key: MapKey<'_>) -> HeapAddr {
    let found = find_node(heap, map, key, key.hash());
    if found.node == NULL_PTR {
        NULL_PTR
    } else {
        found.node + NODE_VALUE_OFFSET
    }
}

/// Remove `key` from the map, splicing its node out of the chain and freeing
/// the node and its key entry. Returns whether a key was removed.
///
/// The value entry (if any) is not touched; releasing it is the caller's job
/// before deleting.
pub fn delete(carrier: &mut Carrier, map: HeapAddr, key: MapKey<'_>) -> bool {
    let hash = key.hash();
    let found = find_node(&carrier.heap, map, key, hash);
    if found.node == NULL_PTR {
        return false;
    }

    let next = carrier.heap.read_u32(found.node + NODE_NEXT_OFFSET);
    if found.prev == NULL_PTR {
        let bucket_slot = bucket_slot(&carrier.heap, map, hash);
        carrier.heap.write_u32(bucket_slot, next);
    } else {
        carrier.heap.write_u32(found.prev + NODE_NEXT_OFFSET, next);
    }

    let key_entry = carrier.heap.read_u32(found.node + NODE_KEY_OFFSET);
    carrier.allocator.free(&carrier.heap, key_entry);
    carrier.allocator.free(&carrier.heap, found.node);

    let size = carrier.heap.read_u32(map + MAP_SIZE_OFFSET);
    carrier.heap.write_u32(map + MAP_SIZE_OFFSET, size - 1);
    true
}

/// Live key count, read from the header in O(1)
#[inline]
pub fn size(heap: &Heap, map: HeapAddr) -> u32 {
    heap.read_u32(map + MAP_SIZE_OFFSET)
}

/// Lazily walk every node in bucket-index then chain order.
///
/// Pass 0 to start and the previous return value to continue; returns 0 after
/// the last node. Restartable at any point since the cursor is just a node
/// address.
pub fn low_level_iterator(heap: &Heap, map: HeapAddr, cursor: HeapAddr) -> HeapAddr {
    let capacity = heap.read_u32(map + MAP_CAPACITY_OFFSET);
    let buckets = heap.read_u32(map + MAP_BUCKETS_OFFSET);

    let mut bucket_index = if cursor == NULL_PTR {
        0
    } else {
        let next = heap.read_u32(cursor + NODE_NEXT_OFFSET);
        if next != NULL_PTR {
            return next;
        }
        heap.read_u32(cursor + NODE_HASH_OFFSET) % capacity + 1
    };

    while bucket_index < capacity {
        let head = heap.read_u32(buckets + bucket_index * BUCKET_SLOT_BYTES);
        if head != NULL_PTR {
            return head;
        }
        bucket_index += 1;
    }
    NULL_PTR
}

/// Key entry address and value slot address of an iterator cursor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeKeyValue {
    pub key: HeapAddr,
    pub value_slot: HeapAddr,
}

/// Resolve an iterator cursor to its key entry and value slot
#[inline]
pub fn node_key_value(heap: &Heap, node: HeapAddr) -> NodeKeyValue {
    NodeKeyValue {
        key: heap.read_u32(node + NODE_KEY_OFFSET),
        value_slot: node + NODE_VALUE_OFFSET,
    }
}

/// Every address a map owns, reported for reclamation planning.
///
/// `pointers` covers the map's own storage (header, buckets array, nodes, key
/// entries); `value_pointers` are the value slot addresses, whose contents the
/// reference graph walker classifies as leaf or arc.
#[derive(Clone, Debug, Default)]
pub struct PointersToFree {
    pub pointers: Vec<HeapAddr>,
    pub value_pointers: Vec<HeapAddr>,
}

/// Walk every node and report all addresses owned by the map
pub fn get_pointers_to_free(heap: &Heap, map: HeapAddr) -> PointersToFree {
    let mut result = PointersToFree::default();
    result.pointers.push(map);
    result.pointers.push(heap.read_u32(map + MAP_BUCKETS_OFFSET));

    let mut cursor = low_level_iterator(heap, map, NULL_PTR);
    while cursor != NULL_PTR {
        let node = node_key_value(heap, cursor);
        result.pointers.push(cursor);
        result.pointers.push(node.key);
        result.value_pointers.push(node.value_slot);
        cursor = low_level_iterator(heap, map, cursor);
    }
    result
}

/// Decode a node's key entry back into a host key
pub fn read_map_key(heap: &Heap, key_entry: HeapAddr) -> HeapResult<OwnedMapKey> {
    match crate::entry::read_tag(heap, key_entry)? {
        EntryTag::Number => Ok(OwnedMapKey::Number(heap.read_f64(key_entry + 1))),
        EntryTag::String => {
            let length = heap.read_u16(key_entry + STRING_LENGTH_OFFSET) as u32;
            let bytes = heap.bytes(key_entry + STRING_PAYLOAD_OFFSET, length);
            match core::str::from_utf8(bytes) {
                Ok(text) => Ok(OwnedMapKey::String(String::from(text))),
                Err(_) => Err(HeapError::CorruptEntry {
                    address: key_entry,
                    tag: EntryTag::String as u8,
                }),
            }
        }
        tag => Err(HeapError::CorruptEntry { address: key_entry, tag: tag as u8 }),
    }
}

struct FindResult {
    node: HeapAddr,
    prev: HeapAddr,
}

fn bucket_slot(heap: &Heap, map: HeapAddr, hash: u32) -> HeapAddr {
    let capacity = heap.read_u32(map + MAP_CAPACITY_OFFSET);
    let buckets = heap.read_u32(map + MAP_BUCKETS_OFFSET);
    buckets + (hash % capacity) * BUCKET_SLOT_BYTES
}

fn find_node(heap: &Heap, map: HeapAddr, key: MapKey<'_>, hash: u32) -> FindResult {
    let mut prev = NULL_PTR;
    let mut node = heap.read_u32(bucket_slot(heap, map, hash));

    while node != NULL_PTR {
        if heap.read_u32(node + NODE_HASH_OFFSET) == hash
            && key_matches(heap, heap.read_u32(node + NODE_KEY_OFFSET), key)
        {
            break;
        }
        prev = node;
        node = heap.read_u32(node + NODE_NEXT_OFFSET);
    }

    FindResult { node, prev }
}

/// Byte-compare a stored key entry against a probe key. Numbers compare by
/// their bit pattern, consistent with the hash over the same bytes.
fn key_matches(heap: &Heap, key_entry: HeapAddr, key: MapKey<'_>) -> bool {
    let tag = heap.read_u8(key_entry);
    match key {
        MapKey::Number(value) => {
            tag == EntryTag::Number as u8
                && heap.bytes(key_entry + 1, 8) == value.to_le_bytes().as_slice()
        }
        MapKey::String(text) => {
            tag == EntryTag::String as u8
                && heap.read_u16(key_entry + STRING_LENGTH_OFFSET) as usize == text.len()
                && heap.bytes(key_entry + STRING_PAYLOAD_OFFSET, text.len() as u32)
                    == text.as_bytes()
        }
    }
}

/// Write a key entry. Key strings are stored as UTF-8 regardless of the
/// carrier's text codec.
fn write_key_entry(carrier: &mut Carrier, key: MapKey<'_>) -> HeapResult<HeapAddr> {
    match key {
        MapKey::Number(value) => {
            let address = carrier.allocator.alloc(&mut carrier.heap, NUMBER_KEY_BYTES)?;
            carrier.heap.write_u8(address, EntryTag::Number as u8);
            carrier.heap.write_f64(address + 1, value);
            Ok(address)
        }
        MapKey::String(text) => {
            if text.len() > u16::MAX as usize {
                return Err(HeapError::ValidationRejected);
            }
            let address = carrier
                .allocator
                .alloc(&mut carrier.heap, STRING_PAYLOAD_OFFSET + text.len() as u32)?;
            carrier.heap.write_u8(address, EntryTag::String as u8);
            carrier.heap.write_u16(address + STRING_LENGTH_OFFSET, text.len() as u16);
            carrier.heap.write_bytes(address + STRING_PAYLOAD_OFFSET, text.as_bytes());
            Ok(address)
        }
    }
}
