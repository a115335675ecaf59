//! Core scenario tests
//!
//! Exercises the hashmap, the reference graph walker, and the refcount
//! cascade together, the way the wrapper layer drives them.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use num_bigint::BigInt;

use crate::hashmap::{self, MapKey, OwnedMapKey};
use crate::{
    create_object_entry, decrement_ref_count_with_num, destroy_entry, get_all_linked_addresses,
    increment_ref_count, object_map_address, read_entry, read_ref_count, write_scalar, Carrier,
    CarrierOptions, EntryValue, ScalarValue, NULL_PTR,
};

fn test_carrier(size: usize) -> Carrier {
    Carrier::new(size, CarrierOptions::default())
}

/// Insert a key and store an encoded number as its value entry
fn set_number(carrier: &mut Carrier, map: u32, key: MapKey<'_>, value: f64) -> u32 {
    let slot = hashmap::insert_or_update(carrier, map, key).unwrap();
    let entry = write_scalar(carrier, &ScalarValue::Number(value)).unwrap();
    carrier.heap.write_u32(slot, entry);
    slot
}

// ============================================================================
// HashMap
// ============================================================================

#[test]
fn test_insert_and_lookup_number_key() {
    let mut carrier = test_carrier(512);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    let slot = hashmap::insert_or_update(&mut carrier, map, MapKey::Number(3.0)).unwrap();
    carrier.heap.write_u32(slot, 5);

    assert_eq!(hashmap::value_lookup(&carrier.heap, map, MapKey::Number(3.0)), slot);
    assert_eq!(carrier.heap.read_u32(slot), 5);
}

#[test]
fn test_insert_and_lookup_string_key() {
    let mut carrier = test_carrier(512);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    let slot = hashmap::insert_or_update(&mut carrier, map, MapKey::String("abc")).unwrap();
    carrier.heap.write_u32(slot, 6);

    assert_eq!(hashmap::value_lookup(&carrier.heap, map, MapKey::String("abc")), slot);
}

#[test]
fn test_same_key_gives_same_slot_without_allocating() {
    let mut carrier = test_carrier(512);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    let first = hashmap::insert_or_update(&mut carrier, map, MapKey::String("abc")).unwrap();
    let stats_after_first = carrier.allocator.stats();

    let second = hashmap::insert_or_update(&mut carrier, map, MapKey::String("abc")).unwrap();

    assert_eq!(first, second);
    assert_eq!(carrier.allocator.stats(), stats_after_first);
    assert_eq!(hashmap::size(&carrier.heap, map), 1);
}

#[test]
fn test_lookup_missing_key_is_null() {
    let mut carrier = test_carrier(512);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    hashmap::insert_or_update(&mut carrier, map, MapKey::String("abc")).unwrap();

    assert_eq!(
        hashmap::value_lookup(&carrier.heap, map, MapKey::String("not a real key")),
        NULL_PTR
    );
}

#[test]
fn test_collision_chain_survives_middle_delete() {
    let mut carrier = test_carrier(1024);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    // Single-byte keys hash to their byte value, so "a" (97), "i" (105) and
    // "q" (113) all land in bucket 1 of an 8-bucket map.
    let a = hashmap::insert_or_update(&mut carrier, map, MapKey::String("a")).unwrap();
    let i = hashmap::insert_or_update(&mut carrier, map, MapKey::String("i")).unwrap();
    let q = hashmap::insert_or_update(&mut carrier, map, MapKey::String("q")).unwrap();

    assert!(hashmap::delete(&mut carrier, map, MapKey::String("i")));

    assert_eq!(hashmap::value_lookup(&carrier.heap, map, MapKey::String("a")), a);
    assert_eq!(hashmap::value_lookup(&carrier.heap, map, MapKey::String("i")), NULL_PTR);
    assert_eq!(hashmap::value_lookup(&carrier.heap, map, MapKey::String("q")), q);
    assert_eq!(hashmap::size(&carrier.heap, map), 2);

    // Deleting the same key again is a no-op
    assert!(!hashmap::delete(&mut carrier, map, MapKey::String("i")));
}

#[test]
fn test_size_accounting_after_deletes() {
    let mut carrier = test_carrier(8192);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    let keys: Vec<String> = (b'a'..=b'z').map(|b| String::from(b as char)).collect();
    for (index, key) in keys.iter().enumerate() {
        let slot =
            hashmap::insert_or_update(&mut carrier, map, MapKey::String(key.as_str())).unwrap();
        carrier.heap.write_u32(slot, index as u32);
    }
    assert_eq!(hashmap::size(&carrier.heap, map), 26);

    for &key in ["a", "b", "c", "t"].iter() {
        assert!(hashmap::delete(&mut carrier, map, MapKey::String(key)));
    }
    assert_eq!(hashmap::size(&carrier.heap, map), 22);

    // The O(1) size field agrees with a full iterator walk
    let mut walked = 0;
    let mut cursor = hashmap::low_level_iterator(&carrier.heap, map, NULL_PTR);
    while cursor != NULL_PTR {
        walked += 1;
        cursor = hashmap::low_level_iterator(&carrier.heap, map, cursor);
    }
    assert_eq!(walked, 22);
}

#[test]
fn test_iterator_visits_every_key_once() {
    let mut carrier = test_carrier(8192);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    let mut expected: Vec<String> = (b'a'..=b'z').map(|b| String::from(b as char)).collect();
    for key in expected.iter() {
        hashmap::insert_or_update(&mut carrier, map, MapKey::String(key.as_str())).unwrap();
    }

    let mut found: Vec<String> = Vec::new();
    let mut cursor = hashmap::low_level_iterator(&carrier.heap, map, NULL_PTR);
    while cursor != NULL_PTR {
        let node = hashmap::node_key_value(&carrier.heap, cursor);
        match hashmap::read_map_key(&carrier.heap, node.key).unwrap() {
            OwnedMapKey::String(key) => found.push(key),
            OwnedMapKey::Number(_) => panic!("expected string key"),
        }
        cursor = hashmap::low_level_iterator(&carrier.heap, map, cursor);
    }

    found.sort();
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn test_pointers_to_free_covers_all_map_storage() {
    let mut carrier = test_carrier(8192);
    let map = hashmap::create_hash_map(&mut carrier, 8).unwrap();

    let count = 10u32;
    for index in 0..count {
        let key = format!("key-{index}");
        let slot =
            hashmap::insert_or_update(&mut carrier, map, MapKey::String(key.as_str())).unwrap();
        carrier.heap.write_u32(slot, index + 100);
    }

    let owned = hashmap::get_pointers_to_free(&carrier.heap, map);

    // Header + buckets, then a node and a key entry per insert
    assert_eq!(owned.pointers.len() as u32, 2 + 2 * count);
    assert_eq!(owned.value_pointers.len() as u32, count);

    let mut values: Vec<u32> =
        owned.value_pointers.iter().map(|&slot| carrier.heap.read_u32(slot)).collect();
    values.sort_unstable();
    let expected: Vec<u32> = (100..100 + count).collect();
    assert_eq!(values, expected);
}

// ============================================================================
// Reference graph walker
// ============================================================================

#[test]
fn test_walker_reports_scalar_graph_as_leaves() {
    let mut carrier = test_carrier(2048);
    let root = create_object_entry(&mut carrier).unwrap();
    let map = object_map_address(&carrier.heap, root).unwrap();

    set_number(&mut carrier, map, MapKey::String("x"), 1.0);
    set_number(&mut carrier, map, MapKey::String("y"), 2.0);

    let linked = get_all_linked_addresses(&carrier.heap, false, root).unwrap();

    // Root + map header + buckets + 2 x (node + key + value entry)
    assert_eq!(linked.leaf_addresses.len(), 9);
    assert!(linked.arc_addresses.is_empty());
    assert!(linked.leaf_addresses.contains(&root));
}

#[test]
fn test_walker_counts_arc_reached_twice() {
    let mut carrier = test_carrier(2048);
    let root = create_object_entry(&mut carrier).unwrap();
    let map = object_map_address(&carrier.heap, root).unwrap();

    let child = create_object_entry(&mut carrier).unwrap();

    let slot_a = hashmap::insert_or_update(&mut carrier, map, MapKey::String("a")).unwrap();
    carrier.heap.write_u32(slot_a, child);

    increment_ref_count(&mut carrier.heap, child).unwrap();
    let slot_b = hashmap::insert_or_update(&mut carrier, map, MapKey::String("b")).unwrap();
    carrier.heap.write_u32(slot_b, child);

    let linked = get_all_linked_addresses(&carrier.heap, false, root).unwrap();

    assert_eq!(linked.arc_addresses.get(&child), Some(&2));
    // The child's own substructure is not walked
    assert!(!linked.leaf_addresses.contains(&child));
}

#[test]
fn test_walker_include_root_counts_shared_root() {
    let mut carrier = test_carrier(2048);
    let root = create_object_entry(&mut carrier).unwrap();

    let linked = get_all_linked_addresses(&carrier.heap, true, root).unwrap();

    assert!(linked.leaf_addresses.is_empty());
    assert_eq!(linked.arc_addresses.get(&root), Some(&1));
}

// ============================================================================
// Refcount store and reclamation
// ============================================================================

#[test]
fn test_reclamation_returns_used_to_baseline() {
    let mut carrier = test_carrier(4096);
    let baseline = carrier.allocator.stats().used;

    let root = create_object_entry(&mut carrier).unwrap();
    let map = object_map_address(&carrier.heap, root).unwrap();
    set_number(&mut carrier, map, MapKey::String("x"), 1.0);
    set_number(&mut carrier, map, MapKey::Number(7.0), 2.0);

    assert!(carrier.allocator.stats().used > baseline);

    let remaining = decrement_ref_count_with_num(&mut carrier, root, 1).unwrap();
    assert_eq!(remaining, 0);
    assert_eq!(carrier.allocator.stats().used, baseline);
}

#[test]
fn test_nested_graph_reclaims_through_cascade() {
    let mut carrier = test_carrier(4096);
    let baseline = carrier.allocator.stats().used;

    let root = create_object_entry(&mut carrier).unwrap();
    let root_map = object_map_address(&carrier.heap, root).unwrap();

    let child = create_object_entry(&mut carrier).unwrap();
    let child_map = object_map_address(&carrier.heap, child).unwrap();
    set_number(&mut carrier, child_map, MapKey::String("inner"), 3.0);

    let slot = hashmap::insert_or_update(&mut carrier, root_map, MapKey::String("child")).unwrap();
    carrier.heap.write_u32(slot, child);

    let wide = BigInt::from(u64::MAX);
    let wide_entry = write_scalar(&mut carrier, &ScalarValue::WideInt(&wide)).unwrap();
    let slot = hashmap::insert_or_update(&mut carrier, root_map, MapKey::String("wide")).unwrap();
    carrier.heap.write_u32(slot, wide_entry);

    decrement_ref_count_with_num(&mut carrier, root, 1).unwrap();
    assert_eq!(carrier.allocator.stats().used, baseline);
}

#[test]
fn test_shared_substructure_survives_first_parent() {
    let mut carrier = test_carrier(4096);
    let baseline = carrier.allocator.stats().used;

    let first = create_object_entry(&mut carrier).unwrap();
    let second = create_object_entry(&mut carrier).unwrap();

    let child = create_object_entry(&mut carrier).unwrap();
    let child_map = object_map_address(&carrier.heap, child).unwrap();
    set_number(&mut carrier, child_map, MapKey::String("shared"), 42.0);

    let first_map = object_map_address(&carrier.heap, first).unwrap();
    let slot = hashmap::insert_or_update(&mut carrier, first_map, MapKey::String("c")).unwrap();
    carrier.heap.write_u32(slot, child);

    increment_ref_count(&mut carrier.heap, child).unwrap();
    let second_map = object_map_address(&carrier.heap, second).unwrap();
    let slot = hashmap::insert_or_update(&mut carrier, second_map, MapKey::String("c")).unwrap();
    carrier.heap.write_u32(slot, child);

    assert_eq!(read_ref_count(&carrier.heap, child).unwrap(), 2);

    // Tearing down the first parent decrements the child but must not free it
    decrement_ref_count_with_num(&mut carrier, first, 1).unwrap();
    assert_eq!(read_ref_count(&carrier.heap, child).unwrap(), 1);

    let slot = hashmap::value_lookup(&carrier.heap, child_map, MapKey::String("shared"));
    let value = read_entry(&carrier, carrier.heap.read_u32(slot)).unwrap();
    assert_eq!(value, EntryValue::Number(42.0));

    // The last referencing parent takes the child with it
    decrement_ref_count_with_num(&mut carrier, second, 1).unwrap();
    assert_eq!(carrier.allocator.stats().used, baseline);
}

#[test]
fn test_destroy_reports_count_without_freeing() {
    let mut carrier = test_carrier(2048);

    let root = create_object_entry(&mut carrier).unwrap();
    increment_ref_count(&mut carrier.heap, root).unwrap();

    assert_eq!(destroy_entry(&mut carrier.heap, root).unwrap(), 1);
    assert_eq!(destroy_entry(&mut carrier.heap, root).unwrap(), 0);

    // Still valid memory: destroy never frees, the caller does
    assert!(matches!(read_entry(&carrier, root).unwrap(), EntryValue::Object { .. }));
}

// ============================================================================
// Transfer
// ============================================================================

#[test]
fn test_buffer_round_trips_through_transfer() {
    let mut carrier = test_carrier(2048);

    let root = create_object_entry(&mut carrier).unwrap();
    let map = object_map_address(&carrier.heap, root).unwrap();
    set_number(&mut carrier, map, MapKey::String("x"), 9.5);
    carrier.heap.set_root_entry(root);

    let bytes = carrier.into_bytes();
    let carrier = Carrier::from_bytes(bytes, CarrierOptions::default()).unwrap();

    let root = carrier.heap.root_entry();
    let map = object_map_address(&carrier.heap, root).unwrap();
    let slot = hashmap::value_lookup(&carrier.heap, map, MapKey::String("x"));
    assert_ne!(slot, NULL_PTR);
    let value = read_entry(&carrier, carrier.heap.read_u32(slot)).unwrap();
    assert_eq!(value, EntryValue::Number(9.5));
}

#[test]
fn test_foreign_bytes_are_rejected() {
    use alloc::vec;

    let bytes = vec![0u8; 64].into_boxed_slice();
    assert!(Carrier::from_bytes(bytes, CarrierOptions::default()).is_err());
}
