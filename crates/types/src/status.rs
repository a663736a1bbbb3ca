//! Signed status digests exchanged during health checks.

use crate::{
    ConsensusMessage, Hasher, KeyPair, SeqNumber, Signature, ValidatorId, ValidatorRegistry,
};
use sbor::prelude::BasicSbor;

/// A compact, signed snapshot of a node's consensus progress.
///
/// Exchanged over the health-check RPC. The digest signature covers the
/// confirmed index, every embedded message, and the timestamp; receivers
/// re-verify the digest and each embedded message independently and
/// discard the whole thing on any failure. A digest is never partially
/// merged.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct NodeStatus {
    /// The sender's last confirmed block index.
    pub last_confirmed: SeqNumber,
    /// The sender's unconfirmed messages for the round in progress.
    pub unconfirmed: Vec<ConsensusMessage>,
    /// Milliseconds of sender node time.
    pub timestamp: u64,
    /// Address of the sending validator.
    pub signer: ValidatorId,
    /// Signature over the digest payload.
    pub signature: Signature,
}

impl NodeStatus {
    /// Build and sign a status digest.
    pub fn signed(
        last_confirmed: SeqNumber,
        unconfirmed: Vec<ConsensusMessage>,
        timestamp: u64,
        key: &KeyPair,
    ) -> Self {
        let payload = digest_payload(last_confirmed, &unconfirmed, timestamp);
        Self {
            last_confirmed,
            unconfirmed,
            timestamp,
            signer: key.validator_id(),
            signature: key.sign(&payload),
        }
    }

    /// Verify the digest wholesale.
    ///
    /// Checks the signer is registered, the digest signature verifies,
    /// and every embedded message verifies under its own signer's key.
    /// Any failure rejects the entire digest.
    pub fn verify(&self, registry: &ValidatorRegistry) -> bool {
        let Some(key) = registry.public_key(self.signer) else {
            return false;
        };
        let payload = digest_payload(self.last_confirmed, &self.unconfirmed, self.timestamp);
        if !key.verify(&payload, &self.signature) {
            return false;
        }
        self.unconfirmed.iter().all(|message| {
            registry
                .public_key(message.signer)
                .is_some_and(|k| message.verify(&k).is_ok())
        })
    }
}

/// Digest payload: index, each message's signature bytes, timestamp.
///
/// Binding the embedded messages by their signatures is sufficient: a
/// message's signature already covers its own content.
fn digest_payload(
    last_confirmed: SeqNumber,
    unconfirmed: &[ConsensusMessage],
    timestamp: u64,
) -> Vec<u8> {
    let mut hasher = Hasher::new();
    hasher.update(&last_confirmed.0.to_le_bytes());
    for message in unconfirmed {
        hasher.update(message.signature.as_bytes());
    }
    hasher.update(&timestamp.to_le_bytes());
    hasher.finalize().as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hash, ValidatorIdentity, ViewNumber};

    fn test_registry(n: usize) -> (ValidatorRegistry, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..n).map(|i| KeyPair::from_seed(&[i as u8 + 1; 32])).collect();
        let ids = keys
            .iter()
            .map(|k| ValidatorIdentity::new(k.public_key(), "127.0.0.1", 7000))
            .collect();
        (ValidatorRegistry::new(keys[0].validator_id(), ids).unwrap(), keys)
    }

    #[test]
    fn test_signed_status_verifies() {
        let (registry, keys) = test_registry(4);
        let message =
            ConsensusMessage::prepare(ViewNumber(1), SeqNumber(1), Hash::of(b"b"), &keys[1], 5);
        let status = NodeStatus::signed(SeqNumber(0), vec![message], 10, &keys[1]);
        assert!(status.verify(&registry));
    }

    #[test]
    fn test_tampered_index_is_rejected() {
        let (registry, keys) = test_registry(4);
        let mut status = NodeStatus::signed(SeqNumber(0), vec![], 10, &keys[1]);
        status.last_confirmed = SeqNumber(9);
        assert!(!status.verify(&registry));
    }

    #[test]
    fn test_bad_embedded_message_rejects_whole_digest() {
        let (registry, keys) = test_registry(4);
        let mut message =
            ConsensusMessage::prepare(ViewNumber(1), SeqNumber(1), Hash::of(b"b"), &keys[1], 5);
        message.block_hash = Hash::of(b"tampered");
        // Digest signature is honest, the embedded message is not.
        let status = NodeStatus::signed(SeqNumber(0), vec![message], 10, &keys[1]);
        assert!(!status.verify(&registry));
    }

    #[test]
    fn test_unknown_signer_is_rejected() {
        let (registry, _) = test_registry(4);
        let stranger = KeyPair::from_seed(&[99; 32]);
        let status = NodeStatus::signed(SeqNumber(3), vec![], 10, &stranger);
        assert!(!status.verify(&registry));
    }
}
