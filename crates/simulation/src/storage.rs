//! In-memory ledger store for simulation.

use palisade_types::{CertifiedBlock, LedgerStore, SeqNumber, StorageError};
use parking_lot::RwLock;

/// A ledger store backed by a vector, seeded with genesis.
///
/// Index in the vector equals block height.
pub struct SimStorage {
    blocks: RwLock<Vec<CertifiedBlock>>,
}

impl SimStorage {
    /// Create a store holding only the genesis block.
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(vec![CertifiedBlock::genesis()]),
        }
    }

    /// Number of stored blocks, genesis included.
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }
}

impl Default for SimStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for SimStorage {
    fn last_confirmed_index(&self) -> SeqNumber {
        SeqNumber(self.blocks.read().len() as u64 - 1)
    }

    fn last_confirmed_block(&self) -> Option<CertifiedBlock> {
        self.blocks.read().last().cloned()
    }

    fn block_at(&self, index: SeqNumber) -> Option<CertifiedBlock> {
        self.blocks.read().get(index.0 as usize).cloned()
    }

    fn append(&self, block: CertifiedBlock) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write();
        let last = SeqNumber(blocks.len() as u64 - 1);
        if block.height() != last.next() {
            return Err(StorageError::NonSequentialAppend {
                got: block.height(),
                last,
            });
        }
        blocks.push(block);
        Ok(())
    }
}
