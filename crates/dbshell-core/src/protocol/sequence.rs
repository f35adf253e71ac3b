//! Per-facade request id generator.
//!
//! Each facade numbers the requests it issues.  The id travels with the
//! request into the driver and comes back on every event the driver produces
//! while serving it, which is how a response is correlated with its request.
//!
//! # Why atomic?
//!
//! Facade methods take `&self` and may be called from several tasks at once.
//! `fetch_add` hands out each id exactly once without taking a lock.  Ids are
//! only compared for equality and order, never used to publish other memory,
//! so `Ordering::Relaxed` is enough.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing request id source, starting at 1.
///
/// Id 0 is never handed out; drivers use it for events not tied to any
/// request.
///
/// # Examples
///
/// ```rust
/// use dbshell_core::protocol::RequestSequence;
///
/// let ids = RequestSequence::new();
/// assert_eq!(ids.next_id(), 1);
/// assert_eq!(ids.next_id(), 2);
/// assert_eq!(ids.last_issued(), 2);
/// ```
#[derive(Debug)]
pub struct RequestSequence {
    next: AtomicU64,
}

/// Correlation id used for events no request asked for.
pub const UNCORRELATED: u64 = 0;

impl RequestSequence {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the most recently issued id, or [`UNCORRELATED`] if none was.
    pub fn last_issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed).saturating_sub(1)
    }
}

impl Default for RequestSequence {
    fn default() -> Self {
        Self::new()
    }
}
