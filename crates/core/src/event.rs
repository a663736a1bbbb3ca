//! Event types for the deterministic state machine.

use palisade_types::{
    CertifiedBlock, ConsensusMessage, NodeStatus, SeqNumber, Transaction, ValidatorId,
};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    Internal = 0,

    /// Timer events: scheduled by the node itself.
    Timer = 1,

    /// Network events: external inputs from other nodes.
    Network = 2,

    /// Client events: external inputs from users.
    Client = 3,
}

/// All possible events a node can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// Time to drive the consensus round through its phases.
    ///
    /// One firing is one scheduler tick: view-change check, view
    /// resolution, propose, prepare, commit, confirm.
    RoundTimer,

    /// Time to ping peers and exchange status digests.
    HealthTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A consensus message arrived from a peer.
    ///
    /// Sender identity comes from the message's signed `signer` field;
    /// the state machine verifies it against the registry before use.
    MessageReceived { message: ConsensusMessage },

    /// A peer broadcast a confirmed block with its quorum proof.
    CertifiedBlockReceived { block: CertifiedBlock },

    /// A peer answered a ping.
    PongReceived { peer: ValidatorId, nonce: u64 },

    /// A ping timed out or failed at the transport.
    PingFailed { peer: ValidatorId },

    /// A peer answered a status exchange.
    StatusReceived { peer: ValidatorId, status: NodeStatus },

    /// A sync fetch returned a batch of certified blocks.
    BlockRangeReceived {
        peer: ValidatorId,
        from: SeqNumber,
        blocks: Vec<CertifiedBlock>,
    },

    /// A sync fetch failed at the transport.
    BlockRangeFailed { peer: ValidatorId },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// A block was confirmed locally (by quorum or by sync).
    ///
    /// Carries the full certified block so subsystems can react: the
    /// pool drops confirmed transactions, metrics record the height.
    BlockConfirmed {
        index: SeqNumber,
        block: Box<CertifiedBlock>,
    },

    /// Catch-up finished; the node is back at the network's head.
    SyncCompleted { index: SeqNumber },

    // ═══════════════════════════════════════════════════════════════════════
    // Client Requests (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// A client submitted a transaction.
    SubmitTransaction { tx: Transaction },
}

impl Event {
    /// Get the priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::BlockConfirmed { .. } | Event::SyncCompleted { .. } => {
                EventPriority::Internal
            }

            Event::RoundTimer | Event::HealthTimer => EventPriority::Timer,

            Event::MessageReceived { .. }
            | Event::CertifiedBlockReceived { .. }
            | Event::PongReceived { .. }
            | Event::PingFailed { .. }
            | Event::StatusReceived { .. }
            | Event::BlockRangeReceived { .. }
            | Event::BlockRangeFailed { .. } => EventPriority::Network,

            Event::SubmitTransaction { .. } => EventPriority::Client,
        }
    }

    /// Check if this is an internal event (consequence of prior processing).
    pub fn is_internal(&self) -> bool {
        self.priority() == EventPriority::Internal
    }

    /// Check if this is a network event (from another node).
    pub fn is_network(&self) -> bool {
        self.priority() == EventPriority::Network
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::RoundTimer => "RoundTimer",
            Event::HealthTimer => "HealthTimer",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::CertifiedBlockReceived { .. } => "CertifiedBlockReceived",
            Event::PongReceived { .. } => "PongReceived",
            Event::PingFailed { .. } => "PingFailed",
            Event::StatusReceived { .. } => "StatusReceived",
            Event::BlockRangeReceived { .. } => "BlockRangeReceived",
            Event::BlockRangeFailed { .. } => "BlockRangeFailed",
            Event::BlockConfirmed { .. } => "BlockConfirmed",
            Event::SyncCompleted { .. } => "SyncCompleted",
            Event::SubmitTransaction { .. } => "SubmitTransaction",
        }
    }
}
