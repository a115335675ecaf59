//! Refcount store and cascading release
//!
//! Shareable entries (WideInt, Object, Array) embed a `u32` refcount directly
//! after their tag byte. The count equals the number of live references into
//! the entry from handles or from other live entries; an entry whose count
//! reaches zero is unreachable and is freed exactly once, along with
//! everything it exclusively owns.

use crate::{
    carrier::Carrier,
    entry::{read_tag, REF_COUNT_OFFSET},
    error::{HeapError, HeapResult},
    heap::{Heap, HeapAddr},
    linked_addresses::get_all_linked_addresses,
};

/// Read the refcount embedded in an arc entry.
///
/// Reading a refcount out of a non-shareable entry is a misread of the buffer
/// and fails as `CorruptEntry`.
pub fn read_ref_count(heap: &Heap, address: HeapAddr) -> HeapResult<u32> {
    let tag = read_tag(heap, address)?;
    if !tag.has_ref_count() {
        return Err(HeapError::CorruptEntry { address, tag: tag as u8 });
    }
    Ok(heap.read_u32(address + REF_COUNT_OFFSET))
}

/// Add one reference to an arc entry, returning the new count
pub fn increment_ref_count(heap: &mut Heap, address: HeapAddr) -> HeapResult<u32> {
    let count = read_ref_count(heap, address)?;
    heap.write_u32(address + REF_COUNT_OFFSET, count + 1);
    Ok(count + 1)
}

/// Drop one reference from an arc entry, returning the new count. Does not
/// free anything; the caller reclaims when the returned count is zero.
pub fn decrement_ref_count(heap: &mut Heap, address: HeapAddr) -> HeapResult<u32> {
    let count = read_ref_count(heap, address)?;
    debug_assert!(count > 0);
    let new_count = count.saturating_sub(1);
    heap.write_u32(address + REF_COUNT_OFFSET, new_count);
    Ok(new_count)
}

/// Release one wrapper-handle reference from the entry, returning the new
/// count. Freeing is the caller's responsibility when this returns 0; see
/// `decrement_ref_count_with_num` for the cascade it must apply.
#[inline]
pub fn destroy_entry(heap: &mut Heap, address: HeapAddr) -> HeapResult<u32> {
    decrement_ref_count(heap, address)
}

/// Subtract `amount` references from an arc entry. When the count reaches
/// zero the entry is torn down: its reachable leaf addresses are freed, and
/// every reachable arc is in turn decremented by the number of times this
/// entry referenced it, cascading recursively.
pub fn decrement_ref_count_with_num(
    carrier: &mut Carrier,
    address: HeapAddr,
    amount: u32,
) -> HeapResult<u32> {
    let count = read_ref_count(&carrier.heap, address)?;
    debug_assert!(amount <= count);
    let new_count = count.saturating_sub(amount);
    carrier.heap.write_u32(address + REF_COUNT_OFFSET, new_count);

    if new_count == 0 {
        let linked = get_all_linked_addresses(&carrier.heap, false, address)?;
        for &leaf in &linked.leaf_addresses {
            carrier.allocator.free(&carrier.heap, leaf);
        }
        for (&arc, &reached) in &linked.arc_addresses {
            decrement_ref_count_with_num(carrier, arc, reached)?;
        }
    }

    Ok(new_count)
}
