//! The validator registry: membership, quorum thresholds, primary rotation.
//!
//! The registry is constructed once from static configuration and passed
//! explicitly into every component that needs it. There is no ambient or
//! global lookup.

use crate::{PublicKey, ValidatorId, ViewNumber};
use std::collections::HashMap;
use std::sync::Arc;

/// The minimum useful BFT validator set: `f = 1`, `n = 3f + 1`.
pub const MIN_VALIDATORS: usize = 4;

/// Errors constructing or querying the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// BFT needs at least [`MIN_VALIDATORS`] validators.
    #[error("{0} validators configured, BFT needs at least {MIN_VALIDATORS}")]
    TooFewValidators(usize),
    /// The same validator appeared twice in configuration.
    #[error("duplicate validator {0:?} in configuration")]
    DuplicateValidator(ValidatorId),
    /// The local validator is not part of the configured set.
    #[error("local validator {0:?} is not in the configured set")]
    LocalNotInSet(ValidatorId),
}

/// Byzantine fault thresholds for a validator-set size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Tolerated faulty validators: `f = (n - 1) / 3`.
    pub fault_budget: usize,
    /// Matching messages needed to trust a claim: `2f + 1`.
    pub quorum: usize,
}

/// Compute `(f, quorum)` for a validator-set size.
///
/// Fails below the minimum useful case (`f = 1`, `n = 4`).
pub fn thresholds(validator_count: usize) -> Result<Thresholds, RegistryError> {
    if validator_count < MIN_VALIDATORS {
        return Err(RegistryError::TooFewValidators(validator_count));
    }
    let fault_budget = (validator_count - 1) / 3;
    Ok(Thresholds {
        fault_budget,
        quorum: 2 * fault_budget + 1,
    })
}

/// A configured validator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidatorIdentity {
    /// Address derived from the public key.
    pub validator_id: ValidatorId,
    /// Signing key the validator's messages verify under.
    pub public_key: PublicKey,
    /// Reachable host name or IP.
    pub host: String,
    /// RPC port.
    pub port: u16,
}

impl ValidatorIdentity {
    /// Build an identity from a public key and endpoint.
    pub fn new(public_key: PublicKey, host: &str, port: u16) -> Self {
        Self {
            validator_id: public_key.validator_id(),
            public_key,
            host: host.to_string(),
            port,
        }
    }
}

/// The fixed validator set, ordered canonically by address.
///
/// The ordering is what makes primary rotation deterministic: every node
/// sorts the same configured set the same way, so
/// `ordered[view mod n]` names the same primary everywhere.
#[derive(Debug, Clone)]
pub struct ValidatorRegistry {
    ordered: Vec<ValidatorIdentity>,
    by_id: HashMap<ValidatorId, usize>,
    local: ValidatorId,
}

impl ValidatorRegistry {
    /// Build a registry from configuration.
    ///
    /// Sorts by address, rejects duplicates, undersized sets, and a local
    /// identity outside the set. These are startup invariants; violation
    /// is fatal for the node.
    pub fn new(
        local: ValidatorId,
        mut identities: Vec<ValidatorIdentity>,
    ) -> Result<Self, RegistryError> {
        if identities.len() < MIN_VALIDATORS {
            return Err(RegistryError::TooFewValidators(identities.len()));
        }
        identities.sort_by_key(|v| v.validator_id);

        let mut by_id = HashMap::with_capacity(identities.len());
        for (index, identity) in identities.iter().enumerate() {
            if by_id.insert(identity.validator_id, index).is_some() {
                return Err(RegistryError::DuplicateValidator(identity.validator_id));
            }
        }
        if !by_id.contains_key(&local) {
            return Err(RegistryError::LocalNotInSet(local));
        }

        Ok(Self {
            ordered: identities,
            by_id,
            local,
        })
    }

    /// Wrap in an `Arc` for injection.
    pub fn into_arc(self) -> Arc<ValidatorRegistry> {
        Arc::new(self)
    }

    /// Number of configured validators.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether the set is empty (never true post-construction).
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// The local validator's address.
    pub fn local_id(&self) -> ValidatorId {
        self.local
    }

    /// Whether `id` is the local validator.
    pub fn is_local(&self, id: ValidatorId) -> bool {
        self.local == id
    }

    /// Whether `id` is a configured validator.
    pub fn contains(&self, id: ValidatorId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// The identities in canonical (address-sorted) order.
    pub fn identities(&self) -> &[ValidatorIdentity] {
        &self.ordered
    }

    /// Look up an identity by address.
    pub fn identity(&self, id: ValidatorId) -> Option<&ValidatorIdentity> {
        self.by_id.get(&id).map(|&i| &self.ordered[i])
    }

    /// Look up a validator's public key.
    pub fn public_key(&self, id: ValidatorId) -> Option<PublicKey> {
        self.identity(id).map(|v| v.public_key)
    }

    /// The non-local identities, for pinging and multicast.
    pub fn peers(&self) -> impl Iterator<Item = &ValidatorIdentity> {
        self.ordered
            .iter()
            .filter(move |v| v.validator_id != self.local)
    }

    /// Current thresholds for the configured set size.
    ///
    /// Reachability never shrinks these: quorum always derives from the
    /// full configured set, while reachable count only gates active mode.
    pub fn thresholds(&self) -> Thresholds {
        // Set size >= MIN_VALIDATORS is a construction invariant.
        thresholds(self.ordered.len()).expect("registry size validated at construction")
    }

    /// The primary for a view: `ordered[view mod n]`.
    pub fn primary_for(&self, view: ViewNumber) -> ValidatorId {
        let index = (view.0 % self.ordered.len() as u64) as usize;
        self.ordered[index].validator_id
    }

    /// Whether the local validator is primary for `view`.
    pub fn is_local_primary(&self, view: ViewNumber) -> bool {
        self.primary_for(view) == self.local
    }
}
