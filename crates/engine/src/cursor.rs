use core_types::BlockNumber;
use std::sync::atomic::{AtomicU64, Ordering};

/// Highest block number already broadcast.
///
/// Starts at zero ("no block seen"), only ever moves forward, and is never
/// reset while the process runs. All updates go through a single
/// compare-and-update so two heads racing past the freshness check cannot
/// both win against the same stale value.
#[derive(Debug, Default)]
pub struct BlockCursor {
    highest: AtomicU64,
}

impl BlockCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> BlockNumber {
        self.highest.load(Ordering::Acquire)
    }

    /// True when `number` would move the cursor forward.
    pub fn is_fresh(&self, number: BlockNumber) -> bool {
        number > self.current()
    }

    /// Moves the cursor to `number` if it is strictly greater than the
    /// current value. Returns whether this call moved it.
    pub fn advance(&self, number: BlockNumber) -> bool {
        self.highest
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (number > current).then_some(number)
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_empty_and_only_moves_forward() {
        let cursor = BlockCursor::new();
        assert_eq!(cursor.current(), 0);
        assert!(cursor.advance(5));
        assert!(!cursor.advance(5));
        assert!(!cursor.advance(3));
        assert!(cursor.advance(9));
        assert_eq!(cursor.current(), 9);
        assert!(!cursor.is_fresh(9));
        assert!(cursor.is_fresh(10));
    }

    #[test]
    fn concurrent_advances_have_exactly_one_winner_per_value() {
        let cursor = Arc::new(BlockCursor::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cursor = Arc::clone(&cursor);
                std::thread::spawn(move || (1..=1000u64).filter(|n| cursor.advance(*n)).count())
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(cursor.current(), 1000);
        assert!(wins >= 1 && wins <= 1000);
    }
}
