//! Peer health monitoring and status digest exchange.
//!
//! Every health tick pings each non-self validator with a nonce. A pong
//! marks the peer reachable and triggers a status digest exchange; a
//! failed ping marks it unreachable. The digest comparison is what
//! drives both catch-up sync (peer ahead) and message-loss recovery
//! (peer level, merge its unconfirmed messages).
//!
//! Reachability also gates participation: the node is **active** - may
//! propose and vote - iff the reachable validator count (self included)
//! meets the quorum threshold. Unreachable peers never shrink the
//! quorum itself; thresholds always derive from the configured set.

use palisade_core::{Action, TimerId};
use palisade_types::{ConsensusMessage, NodeStatus, SeqNumber, ValidatorId, ValidatorRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// What a verified status digest means for the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The digest failed verification and was discarded wholesale.
    Discarded,
    /// The peer is behind us; nothing to learn.
    PeerBehind,
    /// The peer is at our height; merge its unconfirmed messages.
    Merge(Vec<ConsensusMessage>),
    /// The peer is ahead; catch up to its confirmed index.
    PeerAhead(SeqNumber),
}

/// Peer liveness tracking for one validator.
pub struct HealthState {
    /// The fixed validator set.
    registry: Arc<ValidatorRegistry>,

    /// Health tick period.
    interval: Duration,

    /// Reachability per peer. Peers start unreachable and earn the flag
    /// with a pong or a verified status.
    reachable: HashMap<ValidatorId, bool>,

    /// Outstanding ping nonce per peer; a pong with a stale nonce is
    /// ignored.
    outstanding: HashMap<ValidatorId, u64>,

    /// Monotonic nonce source.
    next_nonce: u64,
}

impl std::fmt::Debug for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthState")
            .field("reachable", &self.reachable_count())
            .field("quorum", &self.registry.thresholds().quorum)
            .field("active", &self.is_active())
            .finish()
    }
}

impl HealthState {
    /// Create a health monitor over the registry's peers.
    pub fn new(registry: Arc<ValidatorRegistry>, interval: Duration) -> Self {
        let reachable = registry
            .peers()
            .map(|peer| (peer.validator_id, false))
            .collect();
        Self {
            registry,
            interval,
            reachable,
            outstanding: HashMap::new(),
            next_nonce: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// Reachable validator count, self included.
    pub fn reachable_count(&self) -> usize {
        1 + self.reachable.values().filter(|&&up| up).count()
    }

    /// Whether enough validators are reachable to participate.
    pub fn is_active(&self) -> bool {
        self.reachable_count() >= self.registry.thresholds().quorum
    }

    /// Whether a specific peer is currently reachable.
    pub fn is_reachable(&self, peer: ValidatorId) -> bool {
        self.reachable.get(&peer).copied().unwrap_or(false)
    }

    /// Reachability snapshot for observability.
    pub fn peer_reachability(&self) -> Vec<(ValidatorId, bool)> {
        let mut peers: Vec<_> = self.reachable.iter().map(|(&id, &up)| (id, up)).collect();
        peers.sort_by_key(|(id, _)| *id);
        peers
    }

    fn mark(&mut self, peer: ValidatorId, up: bool) {
        if let Some(entry) = self.reachable.get_mut(&peer) {
            if *entry != up {
                if up {
                    info!(?peer, "Peer reachable");
                } else {
                    warn!(?peer, "Peer unreachable");
                }
            }
            *entry = up;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event Handling
    // ═══════════════════════════════════════════════════════════════════════

    /// Drive one health tick: reschedule and ping every peer.
    pub fn on_health_timer(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::SetTimer {
            id: TimerId::Health,
            duration: self.interval,
        }];

        let peers: Vec<ValidatorId> = self.registry.peers().map(|p| p.validator_id).collect();
        for peer in peers {
            self.next_nonce += 1;
            self.outstanding.insert(peer, self.next_nonce);
            actions.push(Action::PingPeer {
                peer,
                nonce: self.next_nonce,
            });
        }
        actions
    }

    /// A peer answered a ping: mark reachable and exchange digests.
    ///
    /// `status` is the local node's own signed digest, built by the
    /// caller from the round state.
    pub fn on_pong(&mut self, peer: ValidatorId, nonce: u64, status: NodeStatus) -> Vec<Action> {
        match self.outstanding.get(&peer) {
            Some(&expected) if expected == nonce => {}
            _ => {
                trace!(?peer, nonce, "Stale or unexpected pong ignored");
                return vec![];
            }
        }
        self.outstanding.remove(&peer);
        self.mark(peer, true);

        vec![Action::ExchangeStatus {
            peer,
            status: Box::new(status),
        }]
    }

    /// A ping timed out or failed.
    pub fn on_ping_failed(&mut self, peer: ValidatorId) {
        self.outstanding.remove(&peer);
        self.mark(peer, false);
    }

    /// Classify a peer's status digest against local progress.
    ///
    /// An unverifiable digest is discarded wholesale - never partially
    /// merged. A verified one refreshes reachability and compares
    /// confirmed indices: ahead triggers sync, equal merges the peer's
    /// unconfirmed messages, behind is nothing to learn.
    pub fn on_status(
        &mut self,
        peer: ValidatorId,
        status: NodeStatus,
        local_last: SeqNumber,
    ) -> StatusOutcome {
        if status.signer != peer || !status.verify(&self.registry) {
            warn!(?peer, "Discarding unverifiable status digest");
            return StatusOutcome::Discarded;
        }
        self.mark(peer, true);

        debug!(
            ?peer,
            peer_index = %status.last_confirmed,
            local_index = %local_last,
            reported = status.unconfirmed.len(),
            "Status digest verified"
        );

        if status.last_confirmed > local_last {
            StatusOutcome::PeerAhead(status.last_confirmed)
        } else if status.last_confirmed == local_last {
            StatusOutcome::Merge(status.unconfirmed)
        } else {
            StatusOutcome::PeerBehind
        }
    }
}
