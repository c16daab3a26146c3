//! Shared infrastructure for migration tests.
//!
//! Fault-injecting wrappers around the source and the destination, a restarter
//! that counts restarts, and helpers building in-memory replicas and configs.
pub mod destination;
pub mod migration;
pub mod restarter;
pub mod source;

use std::sync::atomic::{AtomicU32, Ordering};

/// Consumes one pending fault, returning `true` if there was one.
pub(crate) fn take_fault(pending: &AtomicU32) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
            pending.checked_sub(1)
        })
        .is_ok()
}
