//! Reference graph walker
//!
//! Given a root entry, classifies every address reachable through the entry's
//! structural children into the reclamation plan:
//!
//! - *Leaf* addresses are exclusively owned by one parent (a map's header,
//!   buckets and nodes, key entries, string payloads, scalar value entries)
//!   and are freed unconditionally by the caller.
//! - *Arc* addresses carry their own refcount and may be shared; the walker
//!   accumulates how many times each was reached from this root, and the
//!   caller subtracts that count from the stored refcount instead of freeing.
//!
//! Every child-bearing tag (Object, Array) is reference counted, so an arc is
//! never descended into here; its substructure is only visited if its own
//! refcount later reaches zero. One consequence: a cycle of arc entries keeps
//! itself alive. There is no cycle collector, matching the explicit-count
//! ownership model.

use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::{
    entry::{read_tag, EntryTag, ARRAY_ELEMENTS_OFFSET, ARRAY_LENGTH_OFFSET, OBJECT_MAP_OFFSET},
    error::HeapResult,
    hashmap,
    heap::{Heap, HeapAddr, NULL_PTR},
};

/// The reclamation plan for one teardown
#[derive(Clone, Debug, Default)]
pub struct LinkedAddresses {
    /// Exclusively owned addresses, freed unconditionally
    pub leaf_addresses: Vec<HeapAddr>,
    /// Shared addresses mapped to the number of times this root reaches them
    pub arc_addresses: HashMap<HeapAddr, u32>,
}

impl LinkedAddresses {
    fn classify(&mut self, heap: &Heap, address: HeapAddr) -> HeapResult<()> {
        if address == NULL_PTR {
            return Ok(());
        }
        let tag = read_tag(heap, address)?;
        if tag.has_ref_count() {
            *self.arc_addresses.entry(address).or_insert(0) += 1;
        } else {
            self.leaf_addresses.push(address);
        }
        Ok(())
    }
}

/// Classify every address reachable from `root`.
///
/// With `include_root = false` the root's storage itself is reported as a
/// leaf: the caller is tearing the root down and frees it along with the rest.
/// With `include_root = true` the root is classified by the same leaf/arc rule
/// as any other discovered address, so a shared root is counted rather than
/// scheduled for freeing (and its substructure stays untouched).
pub fn get_all_linked_addresses(
    heap: &Heap,
    include_root: bool,
    root: HeapAddr,
) -> HeapResult<LinkedAddresses> {
    let mut result = LinkedAddresses::default();
    let tag = read_tag(heap, root)?;

    if include_root && tag.has_ref_count() {
        result.arc_addresses.insert(root, 1);
        return Ok(result);
    }

    result.leaf_addresses.push(root);
    collect_children(heap, root, tag, &mut result)?;
    Ok(result)
}

/// Visit an entry's structural children: map storage and property values for
/// objects, element values for arrays, nothing for scalars.
fn collect_children(
    heap: &Heap,
    address: HeapAddr,
    tag: EntryTag,
    result: &mut LinkedAddresses,
) -> HeapResult<()> {
    match tag {
        EntryTag::Object => {
            let map = heap.read_u32(address + OBJECT_MAP_OFFSET);
            let owned = hashmap::get_pointers_to_free(heap, map);
            result.leaf_addresses.extend_from_slice(&owned.pointers);
            for slot in owned.value_pointers {
                result.classify(heap, heap.read_u32(slot))?;
            }
        }
        EntryTag::Array => {
            let length = heap.read_u32(address + ARRAY_LENGTH_OFFSET);
            let elements = heap.read_u32(address + ARRAY_ELEMENTS_OFFSET);
            result.leaf_addresses.push(elements);
            for index in 0..length {
                result.classify(heap, heap.read_u32(elements + index * 4))?;
            }
        }
        _ => {}
    }
    Ok(())
}
