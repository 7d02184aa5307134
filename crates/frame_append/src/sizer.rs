//! # Memory Accounting
//!
//! Diagnostic sink for per-frame storage footprints.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Receives `(address, bytes)` pairs for owned allocations.
///
/// Implementations decide what to do with repeats; the buffers only report.
pub trait MemorySizer {
    /// Records one allocation of `bytes` bytes starting at `ptr`.
    fn add_object(&self, ptr: *const u8, bytes: usize);
}

/// Thread-safe [`MemorySizer`] that totals distinct allocations.
///
/// The same address reported twice is only counted once, so several
/// containers can report into one tracker without double counting shared
/// storage.
///
/// # Example
///
/// ```rust,ignore
/// let tracker = UsageTracker::new();
/// draw_items.memory_usage(&tracker);
/// shadow_items.memory_usage(&tracker);
/// println!("frame storage: {} bytes", tracker.total_bytes());
/// ```
#[derive(Debug, Default)]
pub struct UsageTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    seen: HashSet<usize>,
    total_bytes: usize,
}

impl UsageTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes of all distinct allocations recorded so far.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// Number of distinct allocations recorded so far.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner.lock().seen.len()
    }

    /// Forgets everything recorded.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.seen.clear();
        state.total_bytes = 0;
    }
}

impl MemorySizer for UsageTracker {
    fn add_object(&self, ptr: *const u8, bytes: usize) {
        if ptr.is_null() || bytes == 0 {
            return;
        }

        let mut state = self.inner.lock();
        if state.seen.insert(ptr as usize) {
            state.total_bytes += bytes;
        }
    }
}
