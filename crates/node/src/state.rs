//! Node state machine.

use crate::FifoPool;
use palisade_bft::{
    HealthState, PbftConfig, PbftState, RecoveredState, StatusOutcome, SyncState,
};
use palisade_core::{Action, Event, StateMachine, TimerId};
use palisade_types::{
    KeyPair, SeqNumber, TransactionPool, ValidatorId, ValidatorRegistry, ViewNumber,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace, warn};

/// Observability snapshot of a node's consensus position.
///
/// Consumed by metrics and by gateways; deliberately flat and
/// serialisable.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeSnapshot {
    /// The local validator address (hex).
    pub validator: String,
    /// Current view number.
    pub view: u64,
    /// Sequence being decided.
    pub seq: u64,
    /// Last confirmed block index.
    pub last_confirmed: u64,
    /// Pre-prepare observed for the current round.
    pub is_pre_prepared: bool,
    /// Own prepare emitted.
    pub is_prepared: bool,
    /// Own commit emitted.
    pub is_committed: bool,
    /// View change request outstanding.
    pub is_view_changed: bool,
    /// Consecutive primary-silent ticks.
    pub fail_count: u32,
    /// Whether the node may propose and vote.
    pub active: bool,
    /// Reachable validators, self included.
    pub reachable: usize,
    /// Whether a catch-up job is in flight.
    pub syncing: bool,
    /// Pooled transactions.
    pub pool_size: usize,
}

/// Combined node state machine.
///
/// Composes the PBFT round driver, the peer health monitor, the block
/// syncer, and the transaction pool into a single state machine. The
/// sub-machines never talk to each other directly; all coordination
/// flows through here, which is the only place that holds them all.
pub struct NodeStateMachine {
    /// The fixed validator set.
    registry: Arc<ValidatorRegistry>,

    /// PBFT round state (propose/prepare/commit/confirm + view change).
    pbft: PbftState,

    /// Peer liveness and status digest exchange.
    health: HealthState,

    /// Catch-up block sync.
    sync: SyncState,

    /// Pending transactions.
    pool: FifoPool,

    /// Current time.
    now: Duration,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("validator", &self.registry.local_id())
            .field("pbft", &self.pbft)
            .field("health", &self.health)
            .field("now", &self.now)
            .finish()
    }
}

impl NodeStateMachine {
    /// Create a node state machine.
    ///
    /// `recovered` seeds the confirmed tip from the ledger store; use
    /// `RecoveredState::genesis()` for a fresh start.
    pub fn new(
        signing_key: KeyPair,
        registry: Arc<ValidatorRegistry>,
        config: PbftConfig,
        recovered: RecoveredState,
    ) -> Self {
        let health = HealthState::new(registry.clone(), config.health_interval);
        let sync = SyncState::new(
            registry.clone(),
            config.sync_page_size,
            config.max_sync_rounds,
        );
        let pbft = PbftState::new(signing_key, registry.clone(), config, recovered);
        Self {
            registry,
            pbft,
            health,
            sync,
            pool: FifoPool::new(),
            now: Duration::ZERO,
        }
    }

    /// Actions that boot the node: the first round and health timers.
    pub fn start(&mut self) -> Vec<Action> {
        info!(
            validator = ?self.registry.local_id(),
            validators = self.registry.len(),
            quorum = self.registry.thresholds().quorum,
            "Node starting"
        );
        vec![
            Action::SetTimer {
                id: TimerId::Round,
                duration: self.pbft.config().round_interval,
            },
            Action::SetTimer {
                id: TimerId::Health,
                duration: self.pbft.config().health_interval,
            },
        ]
    }

    /// The local validator's address.
    pub fn validator_id(&self) -> ValidatorId {
        self.registry.local_id()
    }

    /// A reference to the registry.
    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// A reference to the PBFT state.
    pub fn pbft(&self) -> &PbftState {
        &self.pbft
    }

    /// A reference to the transaction pool.
    pub fn pool(&self) -> &FifoPool {
        &self.pool
    }

    /// Whether a catch-up job is in flight.
    pub fn is_syncing(&self) -> bool {
        self.sync.is_syncing()
    }

    /// Flat snapshot for metrics and gateways.
    pub fn snapshot(&self) -> NodeSnapshot {
        let flags = self.pbft.flags();
        NodeSnapshot {
            validator: self.registry.local_id().to_hex(),
            view: self.pbft.view().0,
            seq: self.pbft.seq().0,
            last_confirmed: self.pbft.last_confirmed().0,
            is_pre_prepared: flags.is_pre_prepared,
            is_prepared: flags.is_prepared,
            is_committed: flags.is_committed,
            is_view_changed: self.pbft.is_view_changed(),
            fail_count: self.pbft.fail_count(),
            active: self.pbft.is_active(),
            reachable: self.health.reachable_count(),
            syncing: self.sync.is_syncing(),
            pool_size: self.pool.len(),
        }
    }

    /// Current view (observability).
    pub fn view(&self) -> ViewNumber {
        self.pbft.view()
    }

    /// Last confirmed index (observability).
    pub fn last_confirmed(&self) -> SeqNumber {
        self.pbft.last_confirmed()
    }

    /// Push the health monitor's verdict into the round driver.
    fn refresh_active(&mut self) {
        self.pbft.set_active(self.health.is_active());
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            // ═══════════════════════════════════════════════════════════════
            // Timers
            // ═══════════════════════════════════════════════════════════════
            Event::RoundTimer => {
                self.refresh_active();
                let max = self.pbft.config().max_block_transactions;
                let pending = self.pool.pending(max);
                self.pbft.on_round_timer(pending)
            }

            Event::HealthTimer => self.health.on_health_timer(),

            // ═══════════════════════════════════════════════════════════════
            // Consensus traffic
            // ═══════════════════════════════════════════════════════════════
            Event::MessageReceived { message } => self.pbft.on_message(message),

            Event::CertifiedBlockReceived { block } => self.pbft.on_certified_block(block),

            // ═══════════════════════════════════════════════════════════════
            // Health / status exchange
            // ═══════════════════════════════════════════════════════════════
            Event::PongReceived { peer, nonce } => {
                let status = self.pbft.status_digest();
                let actions = self.health.on_pong(peer, nonce, status);
                self.refresh_active();
                actions
            }

            Event::PingFailed { peer } => {
                self.health.on_ping_failed(peer);
                self.refresh_active();
                vec![]
            }

            Event::StatusReceived { peer, status } => {
                let outcome = self.health.on_status(peer, status, self.pbft.last_confirmed());
                self.refresh_active();
                match outcome {
                    StatusOutcome::PeerAhead(target) => {
                        self.sync
                            .on_peer_ahead(peer, target, self.pbft.last_confirmed())
                    }
                    StatusOutcome::Merge(messages) => self.pbft.merge_messages(messages),
                    StatusOutcome::PeerBehind | StatusOutcome::Discarded => vec![],
                }
            }

            // ═══════════════════════════════════════════════════════════════
            // Sync
            // ═══════════════════════════════════════════════════════════════
            Event::BlockRangeReceived { peer, blocks, .. } => {
                let step = self.sync.on_block_range(
                    peer,
                    blocks,
                    self.pbft.last_confirmed(),
                    self.pbft.last_confirmed_hash(),
                );
                let mut actions = step.actions;
                for block in step.applied {
                    let index = block.height();
                    let hash = block.hash();
                    self.pbft.advance_confirmed(index, hash);
                    actions.push(Action::EnqueueInternal {
                        event: Box::new(Event::BlockConfirmed {
                            index,
                            block: Box::new(block),
                        }),
                    });
                }
                if let Some(index) = step.completed {
                    actions.push(Action::EnqueueInternal {
                        event: Box::new(Event::SyncCompleted { index }),
                    });
                }
                actions
            }

            Event::BlockRangeFailed { peer } => {
                self.sync.on_fetch_failed(peer);
                vec![]
            }

            Event::SyncCompleted { index } => {
                info!(%index, "Sync complete, resuming normal consensus");
                vec![]
            }

            // ═══════════════════════════════════════════════════════════════
            // Internal
            // ═══════════════════════════════════════════════════════════════
            Event::BlockConfirmed { index, block } => {
                let hashes: Vec<_> = block.block.transactions.iter().map(|tx| tx.hash()).collect();
                self.pool.remove_confirmed(&hashes);
                trace!(%index, transactions = hashes.len(), "Pool pruned for confirmed block");
                vec![]
            }

            // ═══════════════════════════════════════════════════════════════
            // Clients
            // ═══════════════════════════════════════════════════════════════
            Event::SubmitTransaction { tx } => {
                if !self.pool.insert(tx) {
                    warn!("Duplicate transaction submission ignored");
                }
                vec![]
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.pbft.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::test_utils::{test_keys, test_registry, test_transaction};
    use palisade_types::NodeStatus;
    use tracing_test::traced_test;

    fn bench(local: usize) -> (NodeStateMachine, Vec<KeyPair>) {
        let keys = test_keys(4);
        let registry = test_registry(&keys, local).into_arc();
        let node = NodeStateMachine::new(
            keys[local].clone(),
            registry,
            PbftConfig::default(),
            RecoveredState::genesis(),
        );
        (node, keys)
    }

    #[traced_test]
    #[test]
    fn test_start_schedules_both_timers() {
        let (mut node, _) = bench(0);
        let actions = node.start();
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SetTimer { id: TimerId::Round, .. })));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SetTimer { id: TimerId::Health, .. })));
    }

    #[traced_test]
    #[test]
    fn test_round_tick_respects_health_gate() {
        let (mut node, _) = bench(0);
        // No pongs yet: inactive, tick only reschedules.
        let actions = node.handle(Event::RoundTimer);
        assert_eq!(actions.len(), 1);
        assert!(!node.snapshot().active);
    }

    #[traced_test]
    #[test]
    fn test_pong_marks_reachable_and_exchanges_status() {
        let (mut node, keys) = bench(0);
        let ping_actions = node.handle(Event::HealthTimer);
        let (peer, nonce) = ping_actions
            .iter()
            .find_map(|a| match a {
                Action::PingPeer { peer, nonce } => Some((*peer, *nonce)),
                _ => None,
            })
            .expect("pings go out");
        assert_eq!(keys.len(), 4);

        let actions = node.handle(Event::PongReceived { peer, nonce });
        assert!(matches!(actions[0], Action::ExchangeStatus { .. }));
        assert_eq!(node.snapshot().reachable, 2);
    }

    #[traced_test]
    #[test]
    fn test_peer_ahead_status_starts_sync() {
        let (mut node, keys) = bench(0);
        let peer = keys[1].validator_id();
        let status = NodeStatus::signed(SeqNumber(4), vec![], 0, &keys[1]);

        let actions = node.handle(Event::StatusReceived { peer, status });
        assert!(matches!(
            actions[0],
            Action::FetchBlockRange { from: SeqNumber(1), .. }
        ));
        assert!(node.is_syncing());
    }

    #[traced_test]
    #[test]
    fn test_submitted_transactions_reach_the_pool() {
        let (mut node, _) = bench(0);
        node.handle(Event::SubmitTransaction {
            tx: test_transaction(1),
        });
        node.handle(Event::SubmitTransaction {
            tx: test_transaction(1),
        });
        assert_eq!(node.snapshot().pool_size, 1);
    }

    #[traced_test]
    #[test]
    fn test_snapshot_shape() {
        let (node, _) = bench(0);
        let snapshot = node.snapshot();
        assert_eq!(snapshot.seq, 1);
        assert_eq!(snapshot.last_confirmed, 0);
        assert!(!snapshot.is_pre_prepared);
        assert!(!snapshot.syncing);
    }
}
