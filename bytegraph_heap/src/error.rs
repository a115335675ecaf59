//! Error taxonomy for heap operations.
//!
//! Allocation and decode failures surface immediately to the caller; there is
//! no retry or backoff anywhere in this crate. `ValidationRejected` is the one
//! non-fatal variant: the wrapper layer absorbs it at the write boundary and
//! the rejected assignment simply never happens.

use core::fmt;

use crate::heap::HeapAddr;

/// Result type for heap operations
pub type HeapResult<T> = Result<T, HeapError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// The allocator cannot satisfy a request. Fatal to the triggering
    /// operation; all existing structures remain valid.
    OutOfMemory,
    /// An unrecognized tag byte was found while decoding. The buffer is being
    /// misread (or was corrupted) and the read cannot proceed.
    CorruptEntry { address: HeapAddr, tag: u8 },
    /// A value failed pre-allocation validation, e.g. a wide integer whose
    /// magnitude does not fit in 64 bits. No memory was consumed.
    ValidationRejected,
    /// An entry was operated on after its owning handle was destroyed.
    UseAfterFree,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory => write!(f, "out of heap memory"),
            HeapError::CorruptEntry { address, tag } => {
                write!(f, "corrupt entry at {address}: unknown tag {tag}")
            }
            HeapError::ValidationRejected => write!(f, "value rejected by validation"),
            HeapError::UseAfterFree => write!(f, "entry used after free"),
        }
    }
}
