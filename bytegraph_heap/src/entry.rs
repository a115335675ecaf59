//! Tagged entry codec
//!
//! Every value stored in the heap is an Entry: a tag byte followed by a
//! tag-determined payload. The tag is always the first byte and no entry is
//! ever read without checking it first.
//!
//! Layouts (all little-endian, offsets relative to the entry address):
//!
//! ```text
//! Undefined | tag |
//! Null      | tag |
//! Boolean   | tag | u8 |
//! Number    | tag | f64 |
//! String    | tag | byte length: u16 | payload bytes... |
//! WideInt   | tag | refcount: u32 | sign: u8 | magnitude: u64 |
//! Object    | tag | refcount: u32 | hashmap address: u32 |
//! Array     | tag | refcount: u32 | length: u32 | capacity: u32 | elements: u32 |
//! Date      | tag | f64 |
//! ```
//!
//! WideInt, Object and Array are the shareable ("arc") entries; their refcount
//! sits immediately after the tag so the refcount store can find it without
//! knowing the rest of the layout. Freshly written arc entries start with
//! refcount 1, owned by the caller.
//!
//! String payloads are decoded by the stored length, never by a terminator,
//! so embedded NUL bytes round-trip.

use alloc::string::String;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::ToPrimitive;

use crate::{
    carrier::Carrier,
    error::{HeapError, HeapResult},
    hashmap,
    heap::{Heap, HeapAddr},
};

/// Discriminant byte of an entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryTag {
    Undefined = 0,
    Null = 1,
    Boolean = 2,
    Number = 3,
    String = 4,
    WideInt = 5,
    Object = 6,
    Array = 7,
    Date = 8,
}

impl EntryTag {
    /// Decode a tag byte, failing with `CorruptEntry` on anything unknown
    pub fn from_byte(address: HeapAddr, byte: u8) -> HeapResult<EntryTag> {
        match byte {
            0 => Ok(EntryTag::Undefined),
            1 => Ok(EntryTag::Null),
            2 => Ok(EntryTag::Boolean),
            3 => Ok(EntryTag::Number),
            4 => Ok(EntryTag::String),
            5 => Ok(EntryTag::WideInt),
            6 => Ok(EntryTag::Object),
            7 => Ok(EntryTag::Array),
            8 => Ok(EntryTag::Date),
            tag => Err(HeapError::CorruptEntry { address, tag }),
        }
    }

    /// Whether entries of this tag embed a refcount and may be shared by more
    /// than one parent. Every child-bearing tag is in this set.
    #[inline]
    pub fn has_ref_count(self) -> bool {
        matches!(self, EntryTag::WideInt | EntryTag::Object | EntryTag::Array)
    }
}

/// Offset of the refcount in arc entries
pub(crate) const REF_COUNT_OFFSET: u32 = 1;

pub(crate) const STRING_LENGTH_OFFSET: u32 = 1;
pub(crate) const STRING_PAYLOAD_OFFSET: u32 = 3;

const WIDE_SIGN_OFFSET: u32 = 5;
const WIDE_MAGNITUDE_OFFSET: u32 = 6;

pub(crate) const OBJECT_MAP_OFFSET: u32 = 5;

pub(crate) const ARRAY_LENGTH_OFFSET: u32 = 5;
pub(crate) const ARRAY_CAPACITY_OFFSET: u32 = 9;
pub(crate) const ARRAY_ELEMENTS_OFFSET: u32 = 13;

const BOOLEAN_ENTRY_BYTES: u32 = 2;
const NUMBER_ENTRY_BYTES: u32 = 9;
const WIDE_ENTRY_BYTES: u32 = 14;
const OBJECT_ENTRY_BYTES: u32 = 9;
const ARRAY_ENTRY_BYTES: u32 = 17;

/// Bytes per element slot in an array's elements region
const ELEMENT_SLOT_BYTES: u32 = 4;

/// A host value to encode as a scalar entry
#[derive(Clone, Copy, Debug)]
pub enum ScalarValue<'a> {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(&'a str),
    WideInt(&'a BigInt),
    Date(f64),
}

/// A decoded entry
#[derive(Clone, Debug, PartialEq)]
pub enum EntryValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    WideInt(BigInt),
    Object { map: HeapAddr },
    Array { length: u32, capacity: u32, elements: HeapAddr },
    Date(f64),
}

/// Read and decode the tag byte at `address`
#[inline]
pub fn read_tag(heap: &Heap, address: HeapAddr) -> HeapResult<EntryTag> {
    EntryTag::from_byte(address, heap.read_u8(address))
}

/// Whether a wide integer's magnitude fits the 64-bit encoding
#[inline]
pub fn wide_int_fits(value: &BigInt) -> bool {
    value.magnitude().to_u64().is_some()
}

/// Allocate and encode a scalar entry, returning its address.
///
/// Validation happens before allocation: a wide integer whose magnitude
/// exceeds 64 bits, or a string longer than the 16-bit length prefix can
/// express, is `ValidationRejected` and consumes no memory.
pub fn write_scalar(carrier: &mut Carrier, value: &ScalarValue<'_>) -> HeapResult<HeapAddr> {
    match value {
        ScalarValue::Undefined => write_tag_only(carrier, EntryTag::Undefined),
        ScalarValue::Null => write_tag_only(carrier, EntryTag::Null),
        ScalarValue::Boolean(value) => {
            let address = carrier.allocator.alloc(&mut carrier.heap, BOOLEAN_ENTRY_BYTES)?;
            carrier.heap.write_u8(address, EntryTag::Boolean as u8);
            carrier.heap.write_u8(address + 1, *value as u8);
            Ok(address)
        }
        ScalarValue::Number(value) => write_tag_f64(carrier, EntryTag::Number, *value),
        ScalarValue::Date(value) => write_tag_f64(carrier, EntryTag::Date, *value),
        ScalarValue::String(text) => {
            let bytes = carrier.options.text_codec.encode(text);
            if bytes.len() > u16::MAX as usize {
                return Err(HeapError::ValidationRejected);
            }
            let address = carrier
                .allocator
                .alloc(&mut carrier.heap, STRING_PAYLOAD_OFFSET + bytes.len() as u32)?;
            carrier.heap.write_u8(address, EntryTag::String as u8);
            carrier.heap.write_u16(address + STRING_LENGTH_OFFSET, bytes.len() as u16);
            carrier.heap.write_bytes(address + STRING_PAYLOAD_OFFSET, &bytes);
            Ok(address)
        }
        ScalarValue::WideInt(value) => {
            // Validation precedes allocation
            let magnitude = match value.magnitude().to_u64() {
                Some(magnitude) => magnitude,
                None => return Err(HeapError::ValidationRejected),
            };
            let negative = value.sign() == Sign::Minus;

            let address = carrier.allocator.alloc(&mut carrier.heap, WIDE_ENTRY_BYTES)?;
            carrier.heap.write_u8(address, EntryTag::WideInt as u8);
            carrier.heap.write_u32(address + REF_COUNT_OFFSET, 1);
            carrier.heap.write_u8(address + WIDE_SIGN_OFFSET, negative as u8);
            carrier.heap.write_u64(address + WIDE_MAGNITUDE_OFFSET, magnitude);
            Ok(address)
        }
    }
}

fn write_tag_only(carrier: &mut Carrier, tag: EntryTag) -> HeapResult<HeapAddr> {
    let address = carrier.allocator.alloc(&mut carrier.heap, 1)?;
    carrier.heap.write_u8(address, tag as u8);
    Ok(address)
}

fn write_tag_f64(carrier: &mut Carrier, tag: EntryTag, value: f64) -> HeapResult<HeapAddr> {
    let address = carrier.allocator.alloc(&mut carrier.heap, NUMBER_ENTRY_BYTES)?;
    carrier.heap.write_u8(address, tag as u8);
    carrier.heap.write_f64(address + 1, value);
    Ok(address)
}

/// Allocate an Object entry backed by a fresh empty hash map.
///
/// The entry starts with refcount 1, owned by the caller.
pub fn create_object_entry(carrier: &mut Carrier) -> HeapResult<HeapAddr> {
    let capacity = carrier.options.hash_map_capacity;
    let map = hashmap::create_hash_map(carrier, capacity)?;

    let address = match carrier.allocator.alloc(&mut carrier.heap, OBJECT_ENTRY_BYTES) {
        Ok(address) => address,
        Err(err) => {
            hashmap::free_empty_hash_map(carrier, map);
            return Err(err);
        }
    };

    carrier.heap.write_u8(address, EntryTag::Object as u8);
    carrier.heap.write_u32(address + REF_COUNT_OFFSET, 1);
    carrier.heap.write_u32(address + OBJECT_MAP_OFFSET, map);
    Ok(address)
}

/// Allocate an empty Array entry with room for `capacity` elements.
///
/// The entry starts with refcount 1, owned by the caller.
pub fn create_array_entry(carrier: &mut Carrier, capacity: u32) -> HeapResult<HeapAddr> {
    let elements = carrier.allocator.alloc(&mut carrier.heap, capacity * ELEMENT_SLOT_BYTES)?;
    carrier.heap.zero(elements, capacity * ELEMENT_SLOT_BYTES);

    let address = match carrier.allocator.alloc(&mut carrier.heap, ARRAY_ENTRY_BYTES) {
        Ok(address) => address,
        Err(err) => {
            carrier.allocator.free(&carrier.heap, elements);
            return Err(err);
        }
    };

    carrier.heap.write_u8(address, EntryTag::Array as u8);
    carrier.heap.write_u32(address + REF_COUNT_OFFSET, 1);
    carrier.heap.write_u32(address + ARRAY_LENGTH_OFFSET, 0);
    carrier.heap.write_u32(address + ARRAY_CAPACITY_OFFSET, capacity);
    carrier.heap.write_u32(address + ARRAY_ELEMENTS_OFFSET, elements);
    Ok(address)
}

/// Address of the hash map backing an Object entry
pub fn object_map_address(heap: &Heap, address: HeapAddr) -> HeapResult<HeapAddr> {
    expect_tag(heap, address, EntryTag::Object)?;
    Ok(heap.read_u32(address + OBJECT_MAP_OFFSET))
}

/// Live element count of an Array entry
pub fn array_length(heap: &Heap, address: HeapAddr) -> HeapResult<u32> {
    expect_tag(heap, address, EntryTag::Array)?;
    Ok(heap.read_u32(address + ARRAY_LENGTH_OFFSET))
}

/// Allocated element capacity of an Array entry
pub fn array_capacity(heap: &Heap, address: HeapAddr) -> HeapResult<u32> {
    expect_tag(heap, address, EntryTag::Array)?;
    Ok(heap.read_u32(address + ARRAY_CAPACITY_OFFSET))
}

/// Address of the value slot for element `index`, or `ValidationRejected`
/// when the index is out of bounds
pub fn array_element_slot(heap: &Heap, address: HeapAddr, index: u32) -> HeapResult<HeapAddr> {
    expect_tag(heap, address, EntryTag::Array)?;
    if index >= heap.read_u32(address + ARRAY_LENGTH_OFFSET) {
        return Err(HeapError::ValidationRejected);
    }
    let elements = heap.read_u32(address + ARRAY_ELEMENTS_OFFSET);
    Ok(elements + index * ELEMENT_SLOT_BYTES)
}

/// Extend an Array entry by one element and return the new (zeroed) slot.
///
/// When the array is full, a larger elements region is allocated with
/// `array_additional_allocation` slack slots, existing slots are copied over,
/// and the old region is freed. On allocation failure the array is untouched.
pub fn array_push_slot(carrier: &mut Carrier, address: HeapAddr) -> HeapResult<HeapAddr> {
    expect_tag(&carrier.heap, address, EntryTag::Array)?;
    let length = carrier.heap.read_u32(address + ARRAY_LENGTH_OFFSET);
    let capacity = carrier.heap.read_u32(address + ARRAY_CAPACITY_OFFSET);
    let mut elements = carrier.heap.read_u32(address + ARRAY_ELEMENTS_OFFSET);

    if length == capacity {
        let new_capacity = length + 1 + carrier.options.array_additional_allocation;
        let new_elements =
            carrier.allocator.alloc(&mut carrier.heap, new_capacity * ELEMENT_SLOT_BYTES)?;
        carrier.heap.zero(new_elements, new_capacity * ELEMENT_SLOT_BYTES);
        carrier.heap.copy_bytes(elements, new_elements, length * ELEMENT_SLOT_BYTES);
        carrier.allocator.free(&carrier.heap, elements);
        carrier.heap.write_u32(address + ARRAY_CAPACITY_OFFSET, new_capacity);
        carrier.heap.write_u32(address + ARRAY_ELEMENTS_OFFSET, new_elements);
        elements = new_elements;
    }

    carrier.heap.write_u32(address + ARRAY_LENGTH_OFFSET, length + 1);
    Ok(elements + length * ELEMENT_SLOT_BYTES)
}

/// Decode the entry at `address` using its tag byte
pub fn read_entry(carrier: &Carrier, address: HeapAddr) -> HeapResult<EntryValue> {
    let heap = &carrier.heap;
    let tag = read_tag(heap, address)?;
    let value = match tag {
        EntryTag::Undefined => EntryValue::Undefined,
        EntryTag::Null => EntryValue::Null,
        EntryTag::Boolean => EntryValue::Boolean(heap.read_u8(address + 1) != 0),
        EntryTag::Number => EntryValue::Number(heap.read_f64(address + 1)),
        EntryTag::Date => EntryValue::Date(heap.read_f64(address + 1)),
        EntryTag::String => {
            let length = heap.read_u16(address + STRING_LENGTH_OFFSET) as u32;
            let bytes = heap.bytes(address + STRING_PAYLOAD_OFFSET, length);
            let text = match carrier.options.text_codec.decode(bytes) {
                Some(text) => text,
                None => return Err(HeapError::CorruptEntry { address, tag: tag as u8 }),
            };
            EntryValue::String(text)
        }
        EntryTag::WideInt => {
            let negative = heap.read_u8(address + WIDE_SIGN_OFFSET) == 1;
            let magnitude = heap.read_u64(address + WIDE_MAGNITUDE_OFFSET);
            let sign = if magnitude == 0 {
                Sign::NoSign
            } else if negative {
                Sign::Minus
            } else {
                Sign::Plus
            };
            EntryValue::WideInt(BigInt::from_biguint(sign, BigUint::from(magnitude)))
        }
        EntryTag::Object => EntryValue::Object { map: heap.read_u32(address + OBJECT_MAP_OFFSET) },
        EntryTag::Array => EntryValue::Array {
            length: heap.read_u32(address + ARRAY_LENGTH_OFFSET),
            capacity: heap.read_u32(address + ARRAY_CAPACITY_OFFSET),
            elements: heap.read_u32(address + ARRAY_ELEMENTS_OFFSET),
        },
    };
    Ok(value)
}

/// Check that the entry at `address` has the expected tag
pub(crate) fn expect_tag(heap: &Heap, address: HeapAddr, expected: EntryTag) -> HeapResult<()> {
    let tag = read_tag(heap, address)?;
    if tag != expected {
        return Err(HeapError::CorruptEntry { address, tag: tag as u8 });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::CarrierOptions;

    fn test_carrier() -> Carrier {
        Carrier::new(1024, CarrierOptions::default())
    }

    #[test]
    fn test_scalar_round_trips() {
        let mut carrier = test_carrier();

        let cases = [
            (ScalarValue::Undefined, EntryValue::Undefined),
            (ScalarValue::Null, EntryValue::Null),
            (ScalarValue::Boolean(true), EntryValue::Boolean(true)),
            (ScalarValue::Number(-1.5), EntryValue::Number(-1.5)),
            (ScalarValue::Date(1_700_000_000_000.0), EntryValue::Date(1_700_000_000_000.0)),
        ];
        for (input, expected) in cases.iter() {
            let address = write_scalar(&mut carrier, input).unwrap();
            assert_eq!(read_entry(&carrier, address).unwrap(), *expected);
        }
    }

    #[test]
    fn test_string_is_binary_safe() {
        let mut carrier = test_carrier();

        let address = write_scalar(&mut carrier, &ScalarValue::String("a\0b")).unwrap();
        assert_eq!(
            read_entry(&carrier, address).unwrap(),
            EntryValue::String(alloc::string::String::from("a\0b"))
        );
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut carrier = test_carrier();

        let address = carrier.allocator.alloc(&mut carrier.heap, 1).unwrap();
        carrier.heap.write_u8(address, 0xff);
        assert_eq!(
            read_entry(&carrier, address),
            Err(HeapError::CorruptEntry { address, tag: 0xff })
        );
    }

    #[test]
    fn test_wide_int_round_trips_at_bound() {
        let mut carrier = test_carrier();

        let max = BigInt::from(u64::MAX);
        let min = -max.clone();

        let positive = write_scalar(&mut carrier, &ScalarValue::WideInt(&max)).unwrap();
        let negative = write_scalar(&mut carrier, &ScalarValue::WideInt(&min)).unwrap();

        assert_eq!(read_entry(&carrier, positive).unwrap(), EntryValue::WideInt(max));
        assert_eq!(read_entry(&carrier, negative).unwrap(), EntryValue::WideInt(min));
    }

    #[test]
    fn test_wide_int_overflow_rejected_without_allocating() {
        let mut carrier = test_carrier();

        let too_wide = BigInt::from(u64::MAX) + 1;
        let stats_before = carrier.allocator.stats();

        assert_eq!(
            write_scalar(&mut carrier, &ScalarValue::WideInt(&too_wide)),
            Err(HeapError::ValidationRejected)
        );
        assert_eq!(carrier.allocator.stats(), stats_before);
    }
}
