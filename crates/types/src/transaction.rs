//! Transactions and the pool collaborator interface.
//!
//! Consensus treats transactions as opaque payloads supplied by the pool;
//! execution is a downstream concern and never blocks a round.

use crate::{Hash, Hasher};
use sbor::prelude::BasicSbor;

/// An opaque transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Transaction {
    /// Client-supplied payload bytes.
    pub payload: Vec<u8>,
    /// Client nonce, disambiguates identical payloads.
    pub nonce: u64,
}

impl Transaction {
    /// Create a transaction.
    pub fn new(payload: Vec<u8>, nonce: u64) -> Self {
        Self { payload, nonce }
    }

    /// Content hash of this transaction.
    pub fn hash(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(&self.nonce.to_le_bytes());
        hasher.update(&self.payload);
        hasher.finalize()
    }
}

/// The transaction-pool collaborator consumed by the consensus core.
///
/// The pool owns its own thread-safety; consensus only ever asks for an
/// ordered slice of pending transactions when proposing and reports back
/// the hashes a confirmed block consumed.
pub trait TransactionPool: Send + Sync {
    /// Pending transactions in submission order, capped at `max`.
    fn pending(&self, max: usize) -> Vec<Transaction>;

    /// Insert a transaction. Returns `false` if it was already pooled.
    fn insert(&self, tx: Transaction) -> bool;

    /// Drop transactions that were confirmed in a block.
    fn remove_confirmed(&self, hashes: &[Hash]);

    /// Number of pooled transactions.
    fn len(&self) -> usize;

    /// Whether the pool is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
