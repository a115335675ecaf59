//! Process-wide registry of live wrapper handles
//!
//! Keeps the invariant that one heap entry has at most one counted wrapper
//! registration per buffer: populated on first wrap, the entry is removed on
//! disposal (which is how a second disposal of the same handle is detected as
//! use-after-free), and cleared wholesale when a buffer is closed or its
//! bytes are transferred away.

use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashSet;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use bytegraph_heap::HeapAddr;

static NEXT_CARRIER_ID: AtomicU64 = AtomicU64::new(1);

static LIVE_WRAPPERS: Lazy<Mutex<HashSet<(u64, HeapAddr)>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

/// Unique id for a new carrier, used to key its registrations
pub(crate) fn next_carrier_id() -> u64 {
    NEXT_CARRIER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Register a wrapper for `(carrier, address)`. Returns false when the entry
/// is already wrapped, in which case no new reference must be counted.
pub(crate) fn register(carrier: u64, address: HeapAddr) -> bool {
    LIVE_WRAPPERS.lock().insert((carrier, address))
}

/// Remove a wrapper registration. Returns false when there was none, i.e. the
/// handle was already disposed.
pub(crate) fn remove(carrier: u64, address: HeapAddr) -> bool {
    LIVE_WRAPPERS.lock().remove(&(carrier, address))
}

/// Drop every registration belonging to a carrier
pub(crate) fn clear_carrier(carrier: u64) {
    LIVE_WRAPPERS.lock().retain(|&(id, _)| id != carrier);
}
