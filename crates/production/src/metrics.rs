//! Production metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters.
//! Use traces for event-level granularity during investigations.

use palisade_node::NodeSnapshot;
use prometheus::{register_counter, register_gauge, Counter, Gauge};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific metrics for production monitoring.
pub struct Metrics {
    // === Consensus ===
    pub block_height: Gauge,
    pub view_number: Gauge,
    pub view_changes: Gauge,
    pub fail_count: Gauge,
    pub node_active: Gauge,

    // === Network ===
    pub reachable_validators: Gauge,
    pub messages_sent: Counter,
    pub invalid_messages: Gauge,

    // === Sync ===
    pub sync_in_progress: Gauge,

    // === Pool ===
    pub pool_size: Gauge,
}

impl Metrics {
    fn new() -> Self {
        Self {
            block_height: register_gauge!(
                "palisade_block_height",
                "Last confirmed block index"
            )
            .unwrap(),
            view_number: register_gauge!("palisade_view_number", "Current view number").unwrap(),
            view_changes: register_gauge!(
                "palisade_view_changes_total",
                "Adopted view changes since start"
            )
            .unwrap(),
            fail_count: register_gauge!(
                "palisade_fail_count",
                "Consecutive primary-silent ticks"
            )
            .unwrap(),
            node_active: register_gauge!(
                "palisade_node_active",
                "1 when the node may propose and vote"
            )
            .unwrap(),
            reachable_validators: register_gauge!(
                "palisade_reachable_validators",
                "Reachable validators including self"
            )
            .unwrap(),
            messages_sent: register_counter!(
                "palisade_messages_sent_total",
                "Consensus messages handed to the transport"
            )
            .unwrap(),
            invalid_messages: register_gauge!(
                "palisade_invalid_messages_total",
                "Messages dropped at verification"
            )
            .unwrap(),
            sync_in_progress: register_gauge!(
                "palisade_sync_in_progress",
                "1 while a catch-up job is running"
            )
            .unwrap(),
            pool_size: register_gauge!("palisade_pool_size", "Pooled transactions").unwrap(),
        }
    }

    /// Refresh the gauges from a node snapshot.
    pub fn observe_snapshot(&self, snapshot: &NodeSnapshot, view_changes: u64, rejected: u64) {
        self.block_height.set(snapshot.last_confirmed as f64);
        self.view_number.set(snapshot.view as f64);
        self.view_changes.set(view_changes as f64);
        self.fail_count.set(snapshot.fail_count as f64);
        self.node_active.set(if snapshot.active { 1.0 } else { 0.0 });
        self.reachable_validators.set(snapshot.reachable as f64);
        self.invalid_messages.set(rejected as f64);
        self.sync_in_progress
            .set(if snapshot.syncing { 1.0 } else { 0.0 });
        self.pool_size.set(snapshot.pool_size as f64);
    }
}

/// The global metrics registry, created on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Render all registered metrics in Prometheus text format.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&prometheus::gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        metrics().block_height.set(7.0);
        let text = render();
        assert!(text.contains("palisade_block_height"));
    }
}
