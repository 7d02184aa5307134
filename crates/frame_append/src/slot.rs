//! # Slot Claiming
//!
//! The optimistic claim ticket shared by the primary buffer and every page.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Claims one slot from `size`, bounded by `capacity`.
///
/// Returns the claimed (pre-increment) slot index, or `None` once the region
/// is full. A lost compare-exchange reloads and retries; it is never an error.
/// Each returned index is handed to exactly one caller.
#[inline]
pub(crate) fn try_claim(size: &AtomicUsize, capacity: usize) -> Option<usize> {
    let mut current = size.load(Ordering::Relaxed);

    loop {
        if current >= capacity {
            return None;
        }

        match size.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(claimed) => return Some(claimed),
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_claim_until_full() {
        let size = AtomicUsize::new(0);

        assert_eq!(try_claim(&size, 3), Some(0));
        assert_eq!(try_claim(&size, 3), Some(1));
        assert_eq!(try_claim(&size, 3), Some(2));
        assert_eq!(try_claim(&size, 3), None);
        assert_eq!(size.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_claim_zero_capacity() {
        let size = AtomicUsize::new(0);
        assert_eq!(try_claim(&size, 0), None);
        assert_eq!(size.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_claim_never_passes_capacity() {
        // Counter already past capacity (a page claim advanced it).
        let size = AtomicUsize::new(10);
        assert_eq!(try_claim(&size, 4), None);
        assert_eq!(size.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_concurrent_claims_are_unique() {
        let size = Arc::new(AtomicUsize::new(0));
        let capacity = 1000;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let size = Arc::clone(&size);
                thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(slot) = try_claim(&size, capacity) {
                        claimed.push(slot);
                    }
                    claimed
                })
            })
            .collect();

        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();

        assert_eq!(all, (0..capacity).collect::<Vec<_>>());
    }
}
