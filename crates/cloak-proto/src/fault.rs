//! Allocation failure injection (`fault-injection` feature).
//!
//! Makes segment reservations at or above a size fail as if the allocator had
//! refused them, so the fatal resource-exhaustion path can be driven without
//! actually running out of memory. The switch is process-wide.

use std::sync::atomic::{AtomicUsize, Ordering};

static THRESHOLD: AtomicUsize = AtomicUsize::new(usize::MAX);

/// Refuse every reservation of `len` bytes or more until the guard drops.
pub fn fail_reservations_from(len: usize) -> FaultGuard {
    THRESHOLD.store(len, Ordering::SeqCst);
    FaultGuard { _private: () }
}

/// Restores normal reservations when dropped.
#[derive(Debug)]
#[must_use = "reservations go back to normal as soon as the guard is dropped"]
pub struct FaultGuard {
    _private: (),
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        THRESHOLD.store(usize::MAX, Ordering::SeqCst);
    }
}

pub(crate) fn refuses(len: usize) -> bool {
    len >= THRESHOLD.load(Ordering::SeqCst)
}
