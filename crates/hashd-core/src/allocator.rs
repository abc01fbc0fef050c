//! Request identifier allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::RequestId;

/// Issues request identifiers.
///
/// Identifiers start at 1 and increase by one per call with no gaps, even
/// under concurrent callers. The number of identifiers issued so far is the
/// accepted-submission count: it backs both the `total` statistic and the
/// drain comparison at shutdown.
#[derive(Debug, Default)]
pub struct IdAllocator {
    issued: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator that has issued nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next identifier.
    pub fn allocate(&self) -> RequestId {
        self.issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of identifiers issued so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    /// Whether `id` has been handed out by this allocator.
    pub fn is_issued(&self, id: RequestId) -> bool {
        id != 0 && id <= self.issued()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        let allocator = IdAllocator::new();
        assert_eq!(allocator.issued(), 0);
        assert!(!allocator.is_issued(0));
        assert!(!allocator.is_issued(1));

        assert_eq!(allocator.allocate(), 1);
        assert_eq!(allocator.allocate(), 2);
        assert_eq!(allocator.issued(), 2);
        assert!(allocator.is_issued(2));
        assert!(!allocator.is_issued(3));
    }

    #[test]
    fn test_concurrent_allocation_has_no_gaps_or_duplicates() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 500;

        let allocator = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    let mut ids = Vec::with_capacity(PER_THREAD as usize);
                    for _ in 0..PER_THREAD {
                        ids.push(allocator.allocate());
                    }
                    ids
                })
            })
            .collect();

        let mut seen = BTreeSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }

        let expected: BTreeSet<u64> = (1..=THREADS * PER_THREAD).collect();
        assert_eq!(seen, expected);
        assert_eq!(allocator.issued(), THREADS * PER_THREAD);
    }
}
