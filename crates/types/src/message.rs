//! Signed consensus protocol messages.

use crate::{Block, Hash, Hasher, KeyPair, PublicKey, SeqNumber, Signature, ValidatorId, ViewNumber};
use sbor::prelude::BasicSbor;

/// The four protocol message kinds.
///
/// The wire format tags each kind with a fixed 8-byte ASCII marker; the
/// enum is the only place those tags exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum MessageKind {
    /// Primary's block proposal for the current sequence.
    PrePrepare,
    /// Endorsement of an observed proposal.
    Prepare,
    /// Endorsement of a prepare quorum.
    Commit,
    /// Request to advance to a higher view.
    ViewChange,
}

impl MessageKind {
    /// The 8-byte ASCII wire tag for this kind.
    pub fn wire_tag(&self) -> [u8; 8] {
        match self {
            MessageKind::PrePrepare => *b"PREPREPA",
            MessageKind::Prepare => *b"PREPAREM",
            MessageKind::Commit => *b"COMMITMS",
            MessageKind::ViewChange => *b"VIEWCHAN",
        }
    }

    /// Parse a wire tag back into a kind.
    pub fn from_wire_tag(tag: &[u8; 8]) -> Option<Self> {
        match tag {
            b"PREPREPA" => Some(MessageKind::PrePrepare),
            b"PREPAREM" => Some(MessageKind::Prepare),
            b"COMMITMS" => Some(MessageKind::Commit),
            b"VIEWCHAN" => Some(MessageKind::ViewChange),
            _ => None,
        }
    }

    /// Human-readable name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::PrePrepare => "PrePrepare",
            MessageKind::Prepare => "Prepare",
            MessageKind::Commit => "Commit",
            MessageKind::ViewChange => "ViewChange",
        }
    }
}

/// Reasons a received message is rejected before entering the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The signer is not a registered validator.
    #[error("unknown signer {0:?}")]
    UnknownSigner(ValidatorId),
    /// The signature does not verify under the signer's key.
    #[error("invalid signature from {0:?}")]
    BadSignature(ValidatorId),
    /// The payload hash does not match the carried block.
    #[error("payload hash mismatch for {kind:?} at seq {seq}")]
    HashMismatch { kind: MessageKind, seq: SeqNumber },
    /// A pre-prepare without a block.
    #[error("pre-prepare at seq {0} carries no block")]
    MissingBlock(SeqNumber),
    /// A block payload on a kind that never carries one.
    #[error("{0:?} carried an unexpected block payload")]
    UnexpectedBlock(MessageKind),
    /// The message decides a sequence that is already confirmed.
    #[error("stale message for seq {seq}, confirmed up to {confirmed}")]
    StaleSequence { seq: SeqNumber, confirmed: SeqNumber },
}

/// A signed, immutable consensus message.
///
/// Identified everywhere by its signature hex: two structurally equal
/// messages from the same signer carry the same signature and collapse
/// to one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ConsensusMessage {
    /// Which protocol phase this message belongs to.
    pub kind: MessageKind,
    /// View the sender was in.
    pub view: ViewNumber,
    /// Sequence (block height) being decided.
    pub seq: SeqNumber,
    /// For a pre-prepare: the proposed block's hash. For prepare/commit:
    /// the hash of the proposal being endorsed. For view-change: the last
    /// confirmed block's hash.
    pub block_hash: Hash,
    /// Address of the signing validator.
    pub signer: ValidatorId,
    /// Signature over `(view ‖ seq ‖ block_hash ‖ timestamp)`.
    pub signature: Signature,
    /// Milliseconds of node time when the message was built.
    pub timestamp: u64,
    /// The proposed block. Present on pre-prepare only.
    pub block: Option<Block>,
}

impl ConsensusMessage {
    fn signed(
        kind: MessageKind,
        view: ViewNumber,
        seq: SeqNumber,
        block_hash: Hash,
        block: Option<Block>,
        key: &KeyPair,
        timestamp: u64,
    ) -> Self {
        let payload = signing_payload(view, seq, &block_hash, timestamp);
        Self {
            kind,
            view,
            seq,
            block_hash,
            signer: key.validator_id(),
            signature: key.sign(&payload),
            timestamp,
            block,
        }
    }

    /// Build a signed pre-prepare carrying `block`.
    pub fn pre_prepare(
        view: ViewNumber,
        seq: SeqNumber,
        block: Block,
        key: &KeyPair,
        timestamp: u64,
    ) -> Self {
        let hash = block.hash();
        Self::signed(
            MessageKind::PrePrepare,
            view,
            seq,
            hash,
            Some(block),
            key,
            timestamp,
        )
    }

    /// Build a signed prepare endorsing `block_hash`.
    pub fn prepare(
        view: ViewNumber,
        seq: SeqNumber,
        block_hash: Hash,
        key: &KeyPair,
        timestamp: u64,
    ) -> Self {
        Self::signed(MessageKind::Prepare, view, seq, block_hash, None, key, timestamp)
    }

    /// Build a signed commit endorsing `block_hash`.
    pub fn commit(
        view: ViewNumber,
        seq: SeqNumber,
        block_hash: Hash,
        key: &KeyPair,
        timestamp: u64,
    ) -> Self {
        Self::signed(MessageKind::Commit, view, seq, block_hash, None, key, timestamp)
    }

    /// Build a signed view-change requesting `new_view`, anchored at the
    /// last confirmed block's hash.
    pub fn view_change(
        new_view: ViewNumber,
        seq: SeqNumber,
        last_confirmed_hash: Hash,
        key: &KeyPair,
        timestamp: u64,
    ) -> Self {
        Self::signed(
            MessageKind::ViewChange,
            new_view,
            seq,
            last_confirmed_hash,
            None,
            key,
            timestamp,
        )
    }

    /// The ledger key for this message.
    pub fn signature_hex(&self) -> String {
        self.signature.to_hex()
    }

    /// Verify structure and signature under `public_key`.
    ///
    /// Checks that the block payload is present exactly when the kind
    /// requires it, that a carried block actually hashes to `block_hash`
    /// at this sequence, and that the signature covers the canonical
    /// payload. The caller resolves `public_key` from the registry.
    pub fn verify(&self, public_key: &PublicKey) -> Result<(), MessageError> {
        match (self.kind, &self.block) {
            (MessageKind::PrePrepare, Some(block)) => {
                if block.hash() != self.block_hash || block.header.height != self.seq {
                    return Err(MessageError::HashMismatch {
                        kind: self.kind,
                        seq: self.seq,
                    });
                }
            }
            (MessageKind::PrePrepare, None) => {
                return Err(MessageError::MissingBlock(self.seq));
            }
            (_, Some(_)) => return Err(MessageError::UnexpectedBlock(self.kind)),
            (_, None) => {}
        }

        let payload = signing_payload(self.view, self.seq, &self.block_hash, self.timestamp);
        if !public_key.verify(&payload, &self.signature) {
            return Err(MessageError::BadSignature(self.signer));
        }
        Ok(())
    }
}

/// Canonical signing payload: `(view ‖ seq ‖ hash ‖ timestamp)`.
pub fn signing_payload(view: ViewNumber, seq: SeqNumber, hash: &Hash, timestamp: u64) -> Vec<u8> {
    let mut hasher = Hasher::new();
    hasher.update(&view.0.to_le_bytes());
    hasher.update(&seq.0.to_le_bytes());
    hasher.update(hash.as_bytes());
    hasher.update(&timestamp.to_le_bytes());
    hasher.finalize().as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockHeader;

    fn test_key(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; 32])
    }

    fn test_block(height: u64, proposer: ValidatorId) -> Block {
        Block {
            header: BlockHeader {
                height: SeqNumber(height),
                prev_hash: Hash::ZERO,
                tx_root: Hash::ZERO,
                proposer,
                timestamp: 0,
            },
            transactions: vec![],
        }
    }

    #[test]
    fn test_wire_tags_round_trip() {
        for kind in [
            MessageKind::PrePrepare,
            MessageKind::Prepare,
            MessageKind::Commit,
            MessageKind::ViewChange,
        ] {
            assert_eq!(MessageKind::from_wire_tag(&kind.wire_tag()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire_tag(b"BOGUSTAG"), None);
    }

    #[test]
    fn test_pre_prepare_verifies() {
        let key = test_key(1);
        let block = test_block(3, key.validator_id());
        let msg = ConsensusMessage::pre_prepare(ViewNumber(3), SeqNumber(3), block, &key, 7);
        assert!(msg.verify(&key.public_key()).is_ok());
    }

    #[test]
    fn test_tampered_block_hash_is_rejected() {
        let key = test_key(1);
        let block = test_block(3, key.validator_id());
        let mut msg = ConsensusMessage::pre_prepare(ViewNumber(3), SeqNumber(3), block, &key, 7);
        msg.block_hash = Hash::of(b"other");
        assert!(matches!(
            msg.verify(&key.public_key()),
            Err(MessageError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_prepare_with_block_payload_is_rejected() {
        let key = test_key(2);
        let block = test_block(1, key.validator_id());
        let mut msg =
            ConsensusMessage::prepare(ViewNumber(1), SeqNumber(1), block.hash(), &key, 0);
        msg.block = Some(block);
        assert!(matches!(
            msg.verify(&key.public_key()),
            Err(MessageError::UnexpectedBlock(MessageKind::Prepare))
        ));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let key = test_key(1);
        let other = test_key(2);
        let msg = ConsensusMessage::commit(ViewNumber(0), SeqNumber(1), Hash::of(b"b"), &key, 0);
        assert!(matches!(
            msg.verify(&other.public_key()),
            Err(MessageError::BadSignature(_))
        ));
    }

    #[test]
    fn test_equal_messages_share_a_signature() {
        let key = test_key(3);
        let a = ConsensusMessage::prepare(ViewNumber(0), SeqNumber(1), Hash::of(b"b"), &key, 5);
        let b = ConsensusMessage::prepare(ViewNumber(0), SeqNumber(1), Hash::of(b"b"), &key, 5);
        assert_eq!(a.signature_hex(), b.signature_hex());
    }
}
