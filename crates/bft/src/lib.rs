//! PBFT consensus state machine.
//!
//! This crate provides a synchronous PBFT implementation that can be
//! used for both simulation and production.
//!
//! # Architecture
//!
//! The consensus core processes events synchronously:
//!
//! - `Event::RoundTimer` → one scheduler tick: view-change check, view
//!   resolution, propose, prepare, commit, confirm
//! - `Event::MessageReceived` → verify, store, and re-drive the phase
//!   transitions immediately
//! - `Event::HealthTimer` → ping peers, exchange signed status digests
//! - Status comparison → merge a level peer's messages, or sync from an
//!   ahead peer in verified, atomically-aborted pages
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Terminology
//!
//! - **Sequence**: the block height a round is deciding. Strictly
//!   sequential; confirming height N moves every node to deciding N+1.
//!
//! - **View**: a numbered epoch naming the primary. Resets to the
//!   sequence number on confirmation, so the primary rotates once per
//!   height; view changes bump it further when a primary goes silent.
//!
//! - **Quorum certificate**: the pre-prepare plus ≥ 2f+1 prepares and
//!   ≥ 2f+1 commits for one `(seq, hash)`. Stored with the block and
//!   re-verified independently wherever the block travels.
//!
//! # Safety
//!
//! Confirmation is gated purely on quorum *counts* over verified,
//! signature-deduplicated messages. Two quorums of `2f + 1` in a set of
//! `3f + 1` overlap in at least one honest validator, so conflicting
//! blocks cannot both gather certificates at one height. Message
//! arrival order never matters.
//!
//! # Liveness
//!
//! A silent primary costs `fail_threshold` ticks, then a VIEW_CHANGE
//! quorum rotates to the next validator in address order. Nodes cut off
//! from quorum deactivate and resume automatically once peers return;
//! lagging nodes catch up block-by-block with verified sync.

mod config;
mod health;
mod ledger;
mod state;
mod sync;
mod view_change;

pub use config::PbftConfig;
pub use health::{HealthState, StatusOutcome};
pub use ledger::MessageLedger;
pub use state::{PbftState, PbftStats, RecoveredState, RoundFlags};
pub use sync::{SyncState, SyncStep};
pub use view_change::{resolve_view, ViewChangeState};
