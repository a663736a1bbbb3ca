//! Validator node configuration.
//!
//! Loaded once at startup from TOML. Anything that would make
//! consensus unsafe to run - too few validators, a malformed key, a
//! local key outside the set - is a fatal error here; the node must
//! not start degraded.

use palisade_bft::PbftConfig;
use palisade_types::{
    KeyPair, PublicKey, RegistryError, ValidatorIdentity, ValidatorRegistry,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fatal configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("key_seed must be 32 bytes of hex")]
    BadKeySeed,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One configured validator endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PeerConfig {
    /// Ed25519 public key, hex.
    pub public_key: PublicKey,
    /// Reachable host.
    pub host: String,
    /// RPC port.
    pub port: u16,
}

/// Consensus timing knobs, all optional in the file.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ConsensusTuning {
    /// Round tick period in milliseconds.
    pub round_interval_ms: u64,
    /// Health tick period in milliseconds.
    pub health_interval_ms: u64,
    /// Silent ticks before a view change request.
    pub fail_threshold: u32,
    /// Transactions per proposed block.
    pub max_block_transactions: usize,
    /// Blocks per sync fetch.
    pub sync_page_size: usize,
    /// Fetch rounds per catch-up job.
    pub max_sync_rounds: u32,
}

impl Default for ConsensusTuning {
    fn default() -> Self {
        let defaults = PbftConfig::default();
        Self {
            round_interval_ms: defaults.round_interval.as_millis() as u64,
            health_interval_ms: defaults.health_interval.as_millis() as u64,
            fail_threshold: defaults.fail_threshold,
            max_block_transactions: defaults.max_block_transactions,
            sync_page_size: defaults.sync_page_size,
            max_sync_rounds: defaults.max_sync_rounds,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Top-level node configuration.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NodeConfig {
    /// This node's signing seed, 32 bytes of hex.
    pub key_seed: String,
    /// Listen address for the validator RPC port.
    pub listen_host: String,
    /// Listen port.
    pub listen_port: u16,
    /// Ledger store directory.
    pub data_dir: PathBuf,
    /// The full validator set, this node included.
    pub validators: Vec<PeerConfig>,
    /// Consensus timing.
    #[serde(default)]
    pub consensus: ConsensusTuning,
    /// Default tracing filter (overridden by `RUST_LOG`).
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl NodeConfig {
    /// Load and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// The local signing key.
    pub fn signing_key(&self) -> Result<KeyPair, ConfigError> {
        let bytes = hex::decode(&self.key_seed).map_err(|_| ConfigError::BadKeySeed)?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| ConfigError::BadKeySeed)?;
        Ok(KeyPair::from_seed(&seed))
    }

    /// Build the validator registry; fatal if the set is unusable.
    pub fn registry(&self) -> Result<ValidatorRegistry, ConfigError> {
        let identities: Vec<ValidatorIdentity> = self
            .validators
            .iter()
            .map(|peer| ValidatorIdentity::new(peer.public_key, &peer.host, peer.port))
            .collect();
        let local = self.signing_key()?.validator_id();
        Ok(ValidatorRegistry::new(local, identities)?)
    }

    /// Consensus configuration from the tuning section.
    pub fn pbft_config(&self) -> PbftConfig {
        PbftConfig {
            round_interval: Duration::from_millis(self.consensus.round_interval_ms),
            health_interval: Duration::from_millis(self.consensus.health_interval_ms),
            fail_threshold: self.consensus.fail_threshold,
            max_block_transactions: self.consensus.max_block_transactions,
            sync_page_size: self.consensus.sync_page_size,
            max_sync_rounds: self.consensus.max_sync_rounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::test_utils::test_keys;

    fn sample_toml(n: usize) -> String {
        let keys = test_keys(n);
        let mut text = format!(
            "key_seed = \"{}\"\nlisten_host = \"0.0.0.0\"\nlisten_port = 7100\ndata_dir = \"/tmp/palisade\"\n",
            hex::encode([1u8; 32]),
        );
        for (i, key) in keys.iter().enumerate() {
            text.push_str(&format!(
                "[[validators]]\npublic_key = \"{}\"\nhost = \"10.0.0.{}\"\nport = 7100\n",
                key.public_key().to_hex(),
                i + 1,
            ));
        }
        text
    }

    #[test]
    fn test_parse_and_build() {
        let config: NodeConfig = toml::from_str(&sample_toml(4)).unwrap();
        assert_eq!(config.validators.len(), 4);
        // key_seed [1u8; 32] matches test_keys' first seed, so the local
        // validator is in the set.
        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.thresholds().quorum, 3);
        assert_eq!(config.pbft_config().fail_threshold, 2);
    }

    #[test]
    fn test_undersized_set_is_fatal() {
        let config: NodeConfig = toml::from_str(&sample_toml(3)).unwrap();
        assert!(matches!(
            config.registry(),
            Err(ConfigError::Registry(RegistryError::TooFewValidators(3)))
        ));
    }

    #[test]
    fn test_bad_key_seed_is_fatal() {
        let mut config: NodeConfig = toml::from_str(&sample_toml(4)).unwrap();
        config.key_seed = "abc".to_string();
        assert!(matches!(config.signing_key(), Err(ConfigError::BadKeySeed)));
    }

    #[test]
    fn test_tuning_defaults_apply() {
        let config: NodeConfig = toml::from_str(&sample_toml(4)).unwrap();
        assert_eq!(config.consensus.round_interval_ms, 5000);
        assert_eq!(config.log_filter, "info");
    }
}
