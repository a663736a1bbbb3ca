//! Blocks and quorum-certified blocks.

use crate::{
    ConsensusMessage, Hash, Hasher, MessageError, MessageKind, SeqNumber, Transaction,
    ValidatorId, ValidatorRegistry,
};
use sbor::prelude::BasicSbor;
use std::collections::HashSet;

/// Consensus metadata for a block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BlockHeader {
    /// Height of this block; equals the sequence number that decided it.
    pub height: SeqNumber,
    /// Hash of the previous confirmed block (`Hash::ZERO` at genesis).
    pub prev_hash: Hash,
    /// Hash over the ordered transaction hashes.
    pub tx_root: Hash,
    /// Validator that proposed the block.
    pub proposer: ValidatorId,
    /// Milliseconds of proposer node time.
    pub timestamp: u64,
}

/// A proposed or confirmed block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    /// Consensus metadata.
    pub header: BlockHeader,
    /// Ordered transaction payload.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block, computing the transaction root.
    pub fn new(
        height: SeqNumber,
        prev_hash: Hash,
        proposer: ValidatorId,
        timestamp: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let tx_root = transaction_root(&transactions);
        Self {
            header: BlockHeader {
                height,
                prev_hash,
                tx_root,
                proposer,
                timestamp,
            },
            transactions,
        }
    }

    /// The genesis block: height 0, zero parent, no transactions.
    pub fn genesis() -> Self {
        Self::new(SeqNumber(0), Hash::ZERO, ValidatorId([0u8; 20]), 0, vec![])
    }

    /// Canonical hash of the block header.
    pub fn hash(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(&self.header.height.0.to_le_bytes());
        hasher.update(self.header.prev_hash.as_bytes());
        hasher.update(self.header.tx_root.as_bytes());
        hasher.update(&self.header.proposer.0);
        hasher.update(&self.header.timestamp.to_le_bytes());
        hasher.finalize()
    }
}

/// Hash over the ordered transaction hashes.
pub fn transaction_root(transactions: &[Transaction]) -> Hash {
    let mut hasher = Hasher::new();
    for tx in transactions {
        hasher.update(tx.hash().as_bytes());
    }
    hasher.finalize()
}

/// Reasons a quorum proof fails verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// Non-genesis block without a pre-prepare in its proof.
    #[error("missing pre-prepare at height {0}")]
    MissingPrePrepare(SeqNumber),
    /// A proof message is of the wrong kind for its slot.
    #[error("unexpected {0:?} message in proof")]
    WrongKind(MessageKind),
    /// A proof message decides a different sequence than the block.
    #[error("proof message for seq {got} on block at height {expected}")]
    WrongSequence { got: SeqNumber, expected: SeqNumber },
    /// A proof message endorses a different hash than the block's.
    #[error("proof message endorses a foreign hash at height {0}")]
    WrongBlockHash(SeqNumber),
    /// A proof message is signed by an unregistered validator.
    #[error("proof message from unknown validator {0:?}")]
    UnknownSigner(ValidatorId),
    /// The same validator appears twice in one message set.
    #[error("duplicate signer {0:?} in proof")]
    DuplicateSigner(ValidatorId),
    /// A proof message failed structural or signature verification.
    #[error(transparent)]
    InvalidMessage(#[from] MessageError),
    /// Fewer prepares than the quorum threshold.
    #[error("{got} prepares, quorum is {quorum}")]
    NotEnoughPrepares { got: usize, quorum: usize },
    /// Fewer commits than the quorum threshold.
    #[error("{got} commits, quorum is {quorum}")]
    NotEnoughCommits { got: usize, quorum: usize },
}

/// The message bundle proving a block was agreed by a quorum.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct QuorumProof {
    /// The primary's proposal. `None` only for the genesis block.
    pub pre_prepare: Option<ConsensusMessage>,
    /// Prepare messages endorsing the proposal (≥ quorum).
    pub prepares: Vec<ConsensusMessage>,
    /// Commit messages endorsing the prepare quorum (≥ quorum).
    pub commits: Vec<ConsensusMessage>,
}

impl QuorumProof {
    /// The empty proof attached to the genesis block.
    pub fn genesis() -> Self {
        Self {
            pre_prepare: None,
            prepares: vec![],
            commits: vec![],
        }
    }
}

/// A confirmed block together with its quorum proof.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct CertifiedBlock {
    /// The agreed block.
    pub block: Block,
    /// The quorum certificate for it.
    pub proof: QuorumProof,
}

impl CertifiedBlock {
    /// The genesis certified block.
    pub fn genesis() -> Self {
        Self {
            block: Block::genesis(),
            proof: QuorumProof::genesis(),
        }
    }

    /// Height of the certified block.
    pub fn height(&self) -> SeqNumber {
        self.block.header.height
    }

    /// Hash of the certified block.
    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    /// Verify the quorum proof against the registry.
    ///
    /// Genesis (height 0, zero parent) is trusted from configuration and
    /// carries no proof. Every other block needs a pre-prepare plus
    /// quorum-sized prepare and commit sets, all endorsing this block's
    /// hash at this height, each signed by a distinct registered
    /// validator.
    pub fn verify(&self, registry: &ValidatorRegistry) -> Result<(), ProofError> {
        let height = self.height();
        if height.0 == 0 {
            return Ok(());
        }

        let block_hash = self.block.hash();
        let quorum = registry.thresholds().quorum;

        let pre_prepare = self
            .proof
            .pre_prepare
            .as_ref()
            .ok_or(ProofError::MissingPrePrepare(height))?;
        verify_proof_message(pre_prepare, MessageKind::PrePrepare, height, &block_hash, registry)?;

        let mut seen = HashSet::new();
        for prepare in &self.proof.prepares {
            verify_proof_message(prepare, MessageKind::Prepare, height, &block_hash, registry)?;
            if !seen.insert(prepare.signer) {
                return Err(ProofError::DuplicateSigner(prepare.signer));
            }
        }
        if self.proof.prepares.len() < quorum {
            return Err(ProofError::NotEnoughPrepares {
                got: self.proof.prepares.len(),
                quorum,
            });
        }

        seen.clear();
        for commit in &self.proof.commits {
            verify_proof_message(commit, MessageKind::Commit, height, &block_hash, registry)?;
            if !seen.insert(commit.signer) {
                return Err(ProofError::DuplicateSigner(commit.signer));
            }
        }
        if self.proof.commits.len() < quorum {
            return Err(ProofError::NotEnoughCommits {
                got: self.proof.commits.len(),
                quorum,
            });
        }

        Ok(())
    }
}

fn verify_proof_message(
    message: &ConsensusMessage,
    expected_kind: MessageKind,
    height: SeqNumber,
    block_hash: &Hash,
    registry: &ValidatorRegistry,
) -> Result<(), ProofError> {
    if message.kind != expected_kind {
        return Err(ProofError::WrongKind(message.kind));
    }
    if message.seq != height {
        return Err(ProofError::WrongSequence {
            got: message.seq,
            expected: height,
        });
    }
    if message.block_hash != *block_hash {
        return Err(ProofError::WrongBlockHash(height));
    }
    let key = registry
        .public_key(message.signer)
        .ok_or(ProofError::UnknownSigner(message.signer))?;
    message.verify(&key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyPair, ValidatorIdentity, ViewNumber};

    fn test_registry(n: usize) -> (ValidatorRegistry, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..n).map(|i| KeyPair::from_seed(&[i as u8 + 1; 32])).collect();
        let identities = keys
            .iter()
            .map(|k| ValidatorIdentity::new(k.public_key(), "127.0.0.1", 7000))
            .collect();
        let registry = ValidatorRegistry::new(keys[0].validator_id(), identities).unwrap();
        (registry, keys)
    }

    fn certify(block: Block, keys: &[KeyPair], signers: usize) -> CertifiedBlock {
        let seq = block.header.height;
        let view = ViewNumber(seq.0);
        let hash = block.hash();
        let pre_prepare = ConsensusMessage::pre_prepare(view, seq, block.clone(), &keys[0], 1);
        let prepares = keys[..signers]
            .iter()
            .map(|k| ConsensusMessage::prepare(view, seq, hash, k, 2))
            .collect();
        let commits = keys[..signers]
            .iter()
            .map(|k| ConsensusMessage::commit(view, seq, hash, k, 3))
            .collect();
        CertifiedBlock {
            block,
            proof: QuorumProof {
                pre_prepare: Some(pre_prepare),
                prepares,
                commits,
            },
        }
    }

    #[test]
    fn test_genesis_verifies_without_proof() {
        let (registry, _) = test_registry(4);
        assert!(CertifiedBlock::genesis().verify(&registry).is_ok());
    }

    #[test]
    fn test_full_quorum_proof_verifies() {
        let (registry, keys) = test_registry(4);
        let block = Block::new(
            SeqNumber(1),
            CertifiedBlock::genesis().hash(),
            keys[0].validator_id(),
            1,
            vec![Transaction::new(b"t".to_vec(), 0)],
        );
        let certified = certify(block, &keys, 3);
        assert!(certified.verify(&registry).is_ok());
    }

    #[test]
    fn test_sub_quorum_proof_is_rejected() {
        let (registry, keys) = test_registry(4);
        let block = Block::new(
            SeqNumber(1),
            Hash::ZERO,
            keys[0].validator_id(),
            1,
            vec![],
        );
        let certified = certify(block, &keys, 2);
        assert!(matches!(
            certified.verify(&registry),
            Err(ProofError::NotEnoughPrepares { got: 2, quorum: 3 })
        ));
    }

    #[test]
    fn test_duplicate_signer_is_rejected() {
        let (registry, keys) = test_registry(4);
        let block = Block::new(SeqNumber(1), Hash::ZERO, keys[0].validator_id(), 1, vec![]);
        let mut certified = certify(block, &keys, 3);
        // Same signer twice, fresh timestamp so the signature differs.
        let dup = ConsensusMessage::prepare(
            ViewNumber(1),
            SeqNumber(1),
            certified.block.hash(),
            &keys[0],
            99,
        );
        certified.proof.prepares.push(dup);
        assert!(matches!(
            certified.verify(&registry),
            Err(ProofError::DuplicateSigner(_))
        ));
    }

    #[test]
    fn test_foreign_hash_message_is_rejected() {
        let (registry, keys) = test_registry(4);
        let block = Block::new(SeqNumber(1), Hash::ZERO, keys[0].validator_id(), 1, vec![]);
        let mut certified = certify(block, &keys, 3);
        certified.proof.commits[0] =
            ConsensusMessage::commit(ViewNumber(1), SeqNumber(1), Hash::of(b"fork"), &keys[0], 3);
        assert!(matches!(
            certified.verify(&registry),
            Err(ProofError::WrongBlockHash(_))
        ));
    }
}
