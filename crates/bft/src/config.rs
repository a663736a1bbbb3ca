//! Consensus configuration.

use std::time::Duration;

/// Tunable consensus parameters.
///
/// These are operational knobs, not protocol semantics: two nodes with
/// different tick intervals or fail thresholds still agree, they just
/// time out at different speeds.
#[derive(Debug, Clone)]
pub struct PbftConfig {
    /// Period of the round tick that drives the protocol phases.
    pub round_interval: Duration,

    /// Period of the peer health check (ping + status exchange).
    pub health_interval: Duration,

    /// Consecutive primary-silent ticks before requesting a view change.
    pub fail_threshold: u32,

    /// Maximum transactions packed into one proposed block.
    pub max_block_transactions: usize,

    /// Blocks fetched per sync request (sync is paged, never unbounded).
    pub sync_page_size: usize,

    /// Maximum fetch rounds in one catch-up before giving up; bounds the
    /// chase when a peer keeps advancing.
    pub max_sync_rounds: u32,
}

impl Default for PbftConfig {
    fn default() -> Self {
        Self {
            round_interval: Duration::from_secs(5),
            health_interval: Duration::from_secs(5),
            fail_threshold: 2,
            max_block_transactions: 500,
            sync_page_size: 32,
            max_sync_rounds: 64,
        }
    }
}
