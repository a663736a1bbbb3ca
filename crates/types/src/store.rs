//! The ledger-store collaborator interface.

use crate::{CertifiedBlock, SeqNumber};

/// Errors surfaced by a ledger store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Append skipped an index or rewrote history.
    #[error("append at index {got}, store is at {last}")]
    NonSequentialAppend { got: SeqNumber, last: SeqNumber },
    /// The underlying store failed.
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Persistent store of confirmed blocks.
///
/// Consensus only ever appends; a confirmed block is never mutated or
/// deleted. Implementations provide their own thread-safety — the store
/// is called from runner I/O paths, never from inside the state machine.
pub trait LedgerStore: Send + Sync {
    /// Index of the last confirmed block (0 when only genesis exists).
    fn last_confirmed_index(&self) -> SeqNumber;

    /// The last confirmed block.
    fn last_confirmed_block(&self) -> Option<CertifiedBlock>;

    /// A confirmed block by index.
    fn block_at(&self, index: SeqNumber) -> Option<CertifiedBlock>;

    /// Append the next confirmed block.
    ///
    /// Must reject anything that is not exactly `last + 1` (genesis at 0
    /// into an empty store excepted).
    fn append(&self, block: CertifiedBlock) -> Result<(), StorageError>;

    /// A contiguous range of confirmed blocks starting at `from`, capped
    /// at `count`. Used to answer sync requests; may return fewer blocks
    /// than requested when the chain ends first.
    fn block_range(&self, from: SeqNumber, count: usize) -> Vec<CertifiedBlock> {
        let mut blocks = Vec::new();
        for offset in 0..count as u64 {
            match self.block_at(SeqNumber(from.0 + offset)) {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        blocks
    }
}
