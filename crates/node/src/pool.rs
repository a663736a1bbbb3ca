//! In-memory FIFO transaction pool.
//!
//! Reference implementation of the pool collaborator: submission order
//! is proposal order, dedup is by transaction hash. Anything smarter
//! (fees, priorities, gossip) lives outside the consensus core.

use palisade_types::{Hash, Transaction, TransactionPool};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

#[derive(Default)]
struct PoolInner {
    queue: VecDeque<Transaction>,
    hashes: HashSet<Hash>,
}

/// A FIFO pool with hash dedup.
#[derive(Default)]
pub struct FifoPool {
    inner: Mutex<PoolInner>,
}

impl FifoPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionPool for FifoPool {
    fn pending(&self, max: usize) -> Vec<Transaction> {
        let inner = self.inner.lock();
        inner.queue.iter().take(max).cloned().collect()
    }

    fn insert(&self, tx: Transaction) -> bool {
        let mut inner = self.inner.lock();
        if !inner.hashes.insert(tx.hash()) {
            return false;
        }
        inner.queue.push_back(tx);
        true
    }

    fn remove_confirmed(&self, hashes: &[Hash]) {
        if hashes.is_empty() {
            return;
        }
        let confirmed: HashSet<&Hash> = hashes.iter().collect();
        let mut inner = self.inner.lock();
        inner.queue.retain(|tx| !confirmed.contains(&tx.hash()));
        for hash in hashes {
            inner.hashes.remove(hash);
        }
        debug!(removed = hashes.len(), remaining = inner.queue.len(), "Pool pruned");
    }

    fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::test_utils::test_transaction;

    #[test]
    fn test_fifo_order_and_dedup() {
        let pool = FifoPool::new();
        assert!(pool.insert(test_transaction(1)));
        assert!(pool.insert(test_transaction(2)));
        assert!(!pool.insert(test_transaction(1)), "duplicate rejected");

        let pending = pool.pending(10);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0], test_transaction(1));
        assert_eq!(pending[1], test_transaction(2));
    }

    #[test]
    fn test_pending_respects_cap() {
        let pool = FifoPool::new();
        for seed in 0..5 {
            pool.insert(test_transaction(seed));
        }
        assert_eq!(pool.pending(3).len(), 3);
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn test_remove_confirmed_allows_resubmission() {
        let pool = FifoPool::new();
        let tx = test_transaction(1);
        pool.insert(tx.clone());
        pool.remove_confirmed(&[tx.hash()]);
        assert!(pool.is_empty());
        assert!(pool.insert(tx), "hash freed after confirmation");
    }
}
