//! Small identifier newtypes shared across the workspace.

use sbor::prelude::BasicSbor;
use std::fmt;

/// A validator's 20-byte address, derived from its public key.
///
/// Addresses give the validator set a canonical order: every node sorts
/// its registry by address so primary rotation agrees network-wide.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct ValidatorId(pub [u8; 20]);

impl ValidatorId {
    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for ValidatorId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for ValidatorId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("validator id must be 20 bytes"))?;
        Ok(ValidatorId(arr))
    }
}

/// Block height / consensus sequence number.
///
/// The sequence number a round is deciding is always the height of the
/// block it will confirm.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor, serde::Serialize, serde::Deserialize,
)]
pub struct SeqNumber(pub u64);

impl SeqNumber {
    /// The next sequence number.
    pub fn next(self) -> SeqNumber {
        SeqNumber(self.0 + 1)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// View number: the epoch identifying the current primary.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor, serde::Serialize, serde::Deserialize,
)]
pub struct ViewNumber(pub u64);

impl ViewNumber {
    /// The next view.
    pub fn next(self) -> ViewNumber {
        ViewNumber(self.0 + 1)
    }
}

impl fmt::Debug for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewNumber({})", self.0)
    }
}

impl fmt::Display for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
