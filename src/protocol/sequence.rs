//! Sequence number allocation.
//!
//! Every outbound frame carries a sequence number; replies echo it back.
//! Two in-flight requests with the same number would corrupt correlation,
//! so allocation is a single atomic fetch-add.

use std::sync::atomic::{AtomicU64, Ordering};

/// Issues unique, strictly increasing sequence numbers for one connection.
///
/// A fresh allocator is created for every connection, which is the only
/// point at which numbering restarts.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU64,
}

impl SequenceAllocator {
    /// Create an allocator whose first issued value is `initial`.
    pub fn new(initial: u64) -> Self {
        Self {
            next: AtomicU64::new(initial),
        }
    }

    /// Issue the next sequence number.
    #[inline]
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::AcqRel)
    }

    /// The value the next call to [`next`](Self::next) will return.
    #[inline]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_initial() {
        let seq = SequenceAllocator::new(5);
        assert_eq!(seq.peek(), 5);
        assert_eq!(seq.next(), 5);
        assert_eq!(seq.next(), 6);
        assert_eq!(seq.peek(), 7);
    }

    #[test]
    fn test_default_starts_at_zero() {
        assert_eq!(SequenceAllocator::default().next(), 0);
    }

    #[test]
    fn test_no_duplicates_across_threads() {
        let seq = Arc::new(SequenceAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || (0..1000).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate sequence {}", value);
            }
        }
        assert_eq!(seen.len(), 8000);
        assert_eq!(seq.peek(), 8000);
    }
}
