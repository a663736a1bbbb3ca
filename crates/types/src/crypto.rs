//! Ed25519 keys and signatures.
//!
//! Signatures are carried on the wire as variable-length byte strings and
//! keyed by their hex encoding throughout the message ledger, so the
//! wrapper types here stay close to raw bytes.

use crate::ValidatorId;
use ed25519_dalek::{Signer, Verifier};
use sbor::prelude::BasicSbor;
use std::fmt;

/// An Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// View the key as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Derive the validator address for this key.
    ///
    /// The address is the trailing 20 bytes of the key's blake3 hash.
    /// Validator ordering (and therefore primary rotation) sorts by this
    /// address, so it must be derived identically on every node.
    pub fn validator_id(&self) -> ValidatorId {
        let digest = blake3::hash(&self.0);
        let bytes = digest.as_bytes();
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&bytes[12..32]);
        ValidatorId(addr)
    }

    /// Verify `signature` over `message` under this key.
    ///
    /// Returns `false` for malformed keys or signatures; verification
    /// failure is never an error at this layer.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(&signature.0) else {
            return false;
        };
        key.verify(message, &sig).is_ok()
    }

    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", &self.to_hex()[..8])
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        Ok(PublicKey(arr))
    }
}

/// An Ed25519 signature (64 bytes, carried as variable-length on the wire).
#[derive(Clone, PartialEq, Eq, Hash, BasicSbor, serde::Serialize, serde::Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// An empty placeholder signature (tests and genesis only).
    pub fn zero() -> Self {
        Signature(vec![0u8; 64])
    }

    /// View the signature as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex encoding, used as the dedup key across the message ledger.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &self.to_hex()[..8.min(self.0.len() * 2)])
    }
}

/// A signing keypair.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Derive a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// The validator address for this keypair.
    pub fn validator_id(&self) -> ValidatorId {
        self.public_key().validator_id()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let key = KeyPair::from_seed(&[7u8; 32]);
        let sig = key.sign(b"round");
        assert!(key.public_key().verify(b"round", &sig));
        assert!(!key.public_key().verify(b"different", &sig));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let a = KeyPair::from_seed(&[1u8; 32]);
        let b = KeyPair::from_seed(&[2u8; 32]);
        let sig = a.sign(b"msg");
        assert!(!b.public_key().verify(b"msg", &sig));
    }

    #[test]
    fn test_validator_id_is_deterministic() {
        let a = KeyPair::from_seed(&[3u8; 32]);
        let b = KeyPair::from_seed(&[3u8; 32]);
        assert_eq!(a.validator_id(), b.validator_id());
    }

    #[test]
    fn test_malformed_signature_is_rejected_not_fatal() {
        let key = KeyPair::from_seed(&[9u8; 32]);
        let bad = Signature(vec![1, 2, 3]);
        assert!(!key.public_key().verify(b"msg", &bad));
    }
}
