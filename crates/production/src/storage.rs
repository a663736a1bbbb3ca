//! RocksDB-backed ledger store.

use palisade_bft::RecoveredState;
use palisade_types::{CertifiedBlock, LedgerStore, SeqNumber, StorageError};
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use tracing::info;

const KEY_LATEST: &[u8] = b"meta:latest";

fn block_key(index: SeqNumber) -> [u8; 14] {
    let mut key = [0u8; 14];
    key[..6].copy_from_slice(b"block:");
    key[6..].copy_from_slice(&index.0.to_be_bytes());
    key
}

fn backend(error: rocksdb::Error) -> StorageError {
    StorageError::Backend(error.to_string())
}

/// Persistent store of confirmed blocks.
///
/// Layout: `block:{index}` → SBOR-encoded [`CertifiedBlock`],
/// `meta:latest` → highest confirmed index. An empty database is seeded
/// with the genesis block on open.
pub struct RocksLedgerStore {
    db: DB,
}

impl RocksLedgerStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).map_err(backend)?;
        let store = Self { db };

        if store.read_latest()?.is_none() {
            info!("Empty ledger store, seeding genesis");
            store.write_block(&CertifiedBlock::genesis())?;
        }
        Ok(store)
    }

    /// Round state recovered from the confirmed tip, for startup.
    pub fn recovered_state(&self) -> Result<RecoveredState, StorageError> {
        let last = self.last_confirmed_index();
        let block = self
            .block_at(last)
            .ok_or_else(|| StorageError::Backend("latest block missing".to_string()))?;
        Ok(RecoveredState {
            last_confirmed: last,
            last_confirmed_hash: block.hash(),
        })
    }

    fn read_latest(&self) -> Result<Option<SeqNumber>, StorageError> {
        let Some(bytes) = self.db.get(KEY_LATEST).map_err(backend)? else {
            return Ok(None);
        };
        let arr: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Backend("corrupt latest marker".to_string()))?;
        Ok(Some(SeqNumber(u64::from_be_bytes(arr))))
    }

    fn write_block(&self, block: &CertifiedBlock) -> Result<(), StorageError> {
        let bytes = sbor::basic_encode(block)
            .map_err(|e| StorageError::Backend(format!("encode: {e:?}")))?;
        let mut batch = WriteBatch::default();
        batch.put(block_key(block.height()), &bytes);
        batch.put(KEY_LATEST, block.height().0.to_be_bytes());
        self.db.write(batch).map_err(backend)
    }
}

impl LedgerStore for RocksLedgerStore {
    fn last_confirmed_index(&self) -> SeqNumber {
        self.read_latest().ok().flatten().unwrap_or(SeqNumber(0))
    }

    fn last_confirmed_block(&self) -> Option<CertifiedBlock> {
        self.block_at(self.last_confirmed_index())
    }

    fn block_at(&self, index: SeqNumber) -> Option<CertifiedBlock> {
        let bytes = self.db.get(block_key(index)).ok().flatten()?;
        sbor::basic_decode(&bytes).ok()
    }

    fn append(&self, block: CertifiedBlock) -> Result<(), StorageError> {
        let last = self.last_confirmed_index();
        if block.height() != last.next() {
            return Err(StorageError::NonSequentialAppend {
                got: block.height(),
                last,
            });
        }
        self.write_block(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::{Block, Hash, QuorumProof, ValidatorId};

    fn block_at_height(height: u64, prev: Hash) -> CertifiedBlock {
        CertifiedBlock {
            block: Block::new(SeqNumber(height), prev, ValidatorId([0; 20]), height, vec![]),
            proof: QuorumProof::genesis(),
        }
    }

    #[test]
    fn test_open_seeds_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksLedgerStore::open(dir.path()).unwrap();
        assert_eq!(store.last_confirmed_index(), SeqNumber(0));
        assert_eq!(
            store.last_confirmed_block().unwrap().hash(),
            CertifiedBlock::genesis().hash()
        );
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RocksLedgerStore::open(dir.path()).unwrap();
            let genesis_hash = store.last_confirmed_block().unwrap().hash();
            store.append(block_at_height(1, genesis_hash)).unwrap();
        }

        // Recovery sees the appended tip.
        let store = RocksLedgerStore::open(dir.path()).unwrap();
        assert_eq!(store.last_confirmed_index(), SeqNumber(1));
        let recovered = store.recovered_state().unwrap();
        assert_eq!(recovered.last_confirmed, SeqNumber(1));
        assert_eq!(
            recovered.last_confirmed_hash,
            store.block_at(SeqNumber(1)).unwrap().hash()
        );
    }

    #[test]
    fn test_non_sequential_append_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksLedgerStore::open(dir.path()).unwrap();
        let err = store.append(block_at_height(5, Hash::ZERO)).unwrap_err();
        assert!(matches!(err, StorageError::NonSequentialAppend { .. }));
    }

    #[test]
    fn test_block_range_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksLedgerStore::open(dir.path()).unwrap();
        let mut prev = store.last_confirmed_block().unwrap().hash();
        for height in 1..=5 {
            let block = block_at_height(height, prev);
            prev = block.hash();
            store.append(block).unwrap();
        }
        let range = store.block_range(SeqNumber(2), 2);
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].height(), SeqNumber(2));
        assert_eq!(range[1].height(), SeqNumber(3));
    }
}
