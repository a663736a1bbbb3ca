//! Action types for the deterministic state machine.

use crate::{Event, TimerId};
use palisade_types::{CertifiedBlock, ConsensusMessage, NodeStatus, SeqNumber, ValidatorId};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Fire-and-forget delivery of a consensus message to every other
    /// validator. The lock-free rule lives here: the state machine has
    /// already recorded its own copy before this action is emitted, so
    /// network delivery happens strictly after the in-memory decision.
    Multicast { message: ConsensusMessage },

    /// Fire-and-forget delivery of a confirmed block plus its proof to
    /// every other validator.
    BroadcastBlock { block: Box<CertifiedBlock> },

    /// Ping one peer with a nonce. The runner answers with
    /// `Event::PongReceived` or `Event::PingFailed`.
    PingPeer { peer: ValidatorId, nonce: u64 },

    /// Exchange status digests with one peer. The runner answers with
    /// `Event::StatusReceived` (dropped silently on transport failure -
    /// the next health tick retries).
    ExchangeStatus {
        peer: ValidatorId,
        status: Box<NodeStatus>,
    },

    /// Fetch a page of confirmed blocks from a peer. The runner answers
    /// with `Event::BlockRangeReceived` or `Event::BlockRangeFailed`.
    FetchBlockRange {
        peer: ValidatorId,
        from: SeqNumber,
        count: usize,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Ledger
    // ═══════════════════════════════════════════════════════════════════════
    /// Append a confirmed block to the ledger store.
    ///
    /// Consensus only appends; the store rejects anything else.
    AppendBlock { block: Box<CertifiedBlock> },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal (fed back as events with Internal priority)
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for immediate processing.
    EnqueueInternal { event: Box<Event> },
}

impl Action {
    /// Check if this action requires network I/O.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Action::Multicast { .. }
                | Action::BroadcastBlock { .. }
                | Action::PingPeer { .. }
                | Action::ExchangeStatus { .. }
                | Action::FetchBlockRange { .. }
        )
    }

    /// Check if this is a ledger write.
    pub fn is_storage_write(&self) -> bool {
        matches!(self, Action::AppendBlock { .. })
    }

    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Multicast { .. } => "Multicast",
            Action::BroadcastBlock { .. } => "BroadcastBlock",
            Action::PingPeer { .. } => "PingPeer",
            Action::ExchangeStatus { .. } => "ExchangeStatus",
            Action::FetchBlockRange { .. } => "FetchBlockRange",
            Action::AppendBlock { .. } => "AppendBlock",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
        }
    }
}
