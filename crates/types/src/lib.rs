//! Core types for Palisade consensus.
//!
//! This crate provides the foundational types used throughout the
//! consensus implementation:
//!
//! - **Primitives**: Hash, Ed25519 keys and signatures
//! - **Identifiers**: ValidatorId, SeqNumber, ViewNumber
//! - **Consensus types**: ConsensusMessage, Block, CertifiedBlock, QuorumProof
//! - **Membership**: ValidatorRegistry and the Byzantine threshold math
//! - **Collaborator traits**: LedgerStore, TransactionPool
//!
//! # Design Philosophy
//!
//! This crate is self-contained and depends on no other workspace crate,
//! making it the foundation layer. Collaborators the consensus core does
//! not own (the ledger store, the transaction pool) appear here only as
//! narrow traits.

mod block;
mod crypto;
mod hash;
mod identifiers;
mod message;
mod registry;
mod status;
mod store;
mod transaction;

pub use block::{
    transaction_root, Block, BlockHeader, CertifiedBlock, ProofError, QuorumProof,
};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::{Hash, Hasher, HexError};
pub use identifiers::{SeqNumber, ValidatorId, ViewNumber};
pub use message::{signing_payload, ConsensusMessage, MessageError, MessageKind};
pub use registry::{
    thresholds, RegistryError, Thresholds, ValidatorIdentity, ValidatorRegistry, MIN_VALIDATORS,
};
pub use status::NodeStatus;
pub use store::{LedgerStore, StorageError};
pub use transaction::{Transaction, TransactionPool};

/// Test utilities shared by downstream crates.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic keypairs for an `n`-validator test network.
    pub fn test_keys(n: usize) -> Vec<KeyPair> {
        (0..n).map(|i| KeyPair::from_seed(&[i as u8 + 1; 32])).collect()
    }

    /// A registry over `keys`, local to `keys[local]`.
    pub fn test_registry(keys: &[KeyPair], local: usize) -> ValidatorRegistry {
        let identities = keys
            .iter()
            .enumerate()
            .map(|(i, k)| ValidatorIdentity::new(k.public_key(), "127.0.0.1", 7000 + i as u16))
            .collect();
        ValidatorRegistry::new(keys[local].validator_id(), identities)
            .expect("test registry is well-formed")
    }

    /// A transaction with a recognisable payload.
    pub fn test_transaction(seed: u8) -> Transaction {
        Transaction::new(vec![seed; 8], seed as u64)
    }
}
