//! PBFT round state machine.
//!
//! This module drives one consensus round at a time through
//! PRE-PREPARE → PREPARE → COMMIT → CONFIRMED as a synchronous,
//! event-driven model. Two inputs move the round forward:
//!
//! - `Event::RoundTimer` - one scheduler tick: view-change check, view
//!   resolution, propose, prepare, commit, confirm
//! - `Event::MessageReceived` - a verified message enters the ledger and
//!   the phase transitions are re-driven immediately, so quorum arrival
//!   is reacted to without waiting for the next tick
//!
//! All I/O is performed by the runner via returned `Action`s. The
//! runner multicasts messages strictly after the in-memory decision has
//! been recorded here.

use palisade_core::{Action, Event, TimerId};
use palisade_types::{
    Block, CertifiedBlock, ConsensusMessage, Hash, KeyPair, MessageKind, NodeStatus, QuorumProof,
    SeqNumber, Transaction, ValidatorRegistry, ViewNumber,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::view_change::{resolve_view, ViewChangeState};
use crate::{MessageLedger, PbftConfig};

/// Consensus statistics for monitoring.
#[derive(Clone, Copy, Debug, Default)]
pub struct PbftStats {
    /// Total adopted view changes.
    pub view_changes: u64,
    /// Blocks confirmed by this node (quorum or sync).
    pub confirmed_blocks: u64,
    /// Messages dropped at verification.
    pub rejected_messages: u64,
}

/// State recovered from the ledger store on startup.
///
/// For a fresh start (empty store seeded with genesis), use
/// `RecoveredState::genesis()`.
#[derive(Debug, Clone)]
pub struct RecoveredState {
    /// Last confirmed block index.
    pub last_confirmed: SeqNumber,
    /// Last confirmed block hash.
    pub last_confirmed_hash: Hash,
}

impl RecoveredState {
    /// Fresh-start state: only the genesis block exists.
    pub fn genesis() -> Self {
        Self {
            last_confirmed: SeqNumber(0),
            last_confirmed_hash: CertifiedBlock::genesis().hash(),
        }
    }
}

impl Default for RecoveredState {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Per-round phase flags.
///
/// The single source of truth for "where am I in this round" - phase
/// position is never inferred from message counts alone. Each flag
/// guards its transition, which is what makes every produce step
/// idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundFlags {
    /// A pre-prepare for the current seq exists (own or received).
    pub is_pre_prepared: bool,
    /// This node has emitted its prepare for the current seq.
    pub is_prepared: bool,
    /// This node has emitted its commit for the current seq.
    pub is_committed: bool,
}

/// PBFT consensus state machine.
///
/// Handles proposal, prepare/commit voting, confirmation, and view
/// changes for one validator.
///
/// # State Machine Flow
///
/// 1. **Round timer** → if primary and not yet proposed, build and
///    multicast a pre-prepare
/// 2. **Pre-prepare observed** → multicast a prepare for its hash
/// 3. **Prepare quorum** → multicast a commit
/// 4. **Prepare + commit quorums** → assemble the certified block,
///    append, broadcast, reset for the next sequence
/// 5. **Primary silent past threshold** → request a view change;
///    a quorum of requests for one higher view rotates the primary
pub struct PbftState {
    // ═══════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════
    /// Signing key for all emitted messages.
    signing_key: KeyPair,

    /// The fixed validator set (quorum math, primary rotation).
    registry: Arc<ValidatorRegistry>,

    // ═══════════════════════════════════════════════════════════════════════
    // Round State
    // ═══════════════════════════════════════════════════════════════════════
    /// Current view; names the primary via the registry.
    view: ViewNumber,

    /// Sequence (block height) this round is deciding.
    seq: SeqNumber,

    /// Last confirmed block index.
    last_confirmed: SeqNumber,

    /// Last confirmed block hash; parent for the next proposal.
    last_confirmed_hash: Hash,

    /// Phase flags for the current round.
    flags: RoundFlags,

    /// View change failure tracking.
    view_change: ViewChangeState,

    /// Unconfirmed messages, keyed by signature.
    ledger: MessageLedger,

    /// Completed ticks since the local prepare was emitted. The commit
    /// step only abandons a below-quorum prepare set after the set had
    /// at least one full tick to gather; this is the bounded poll
    /// window, measured against the injected clock rather than slept.
    prepare_ticks: u32,

    /// Whether this node may propose and vote. Driven by the health
    /// monitor: true iff reachable validators ≥ quorum.
    active: bool,

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration & Time
    // ═══════════════════════════════════════════════════════════════════════
    config: PbftConfig,

    /// Current time (set by runner before each handle call).
    now: Duration,

    // ═══════════════════════════════════════════════════════════════════════
    // Statistics
    // ═══════════════════════════════════════════════════════════════════════
    stats: PbftStats,
}

impl std::fmt::Debug for PbftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbftState")
            .field("validator", &self.registry.local_id())
            .field("view", &self.view)
            .field("seq", &self.seq)
            .field("last_confirmed", &self.last_confirmed)
            .field("flags", &self.flags)
            .field("ledger_len", &self.ledger.len())
            .field("active", &self.active)
            .finish()
    }
}

impl PbftState {
    /// Create a new round state machine.
    ///
    /// `recovered` seeds the confirmed index/hash from the ledger store;
    /// use `RecoveredState::genesis()` for a fresh start. The first
    /// round decides `recovered.last_confirmed + 1`, and the view starts
    /// there too, so the primary rotates once per height by default.
    pub fn new(
        signing_key: KeyPair,
        registry: Arc<ValidatorRegistry>,
        config: PbftConfig,
        recovered: RecoveredState,
    ) -> Self {
        let next = recovered.last_confirmed.next();
        Self {
            signing_key,
            registry,
            view: ViewNumber(next.0),
            seq: next,
            last_confirmed: recovered.last_confirmed,
            last_confirmed_hash: recovered.last_confirmed_hash,
            flags: RoundFlags::default(),
            view_change: ViewChangeState::new(config.fail_threshold),
            ledger: MessageLedger::new(),
            prepare_ticks: 0,
            active: false,
            config,
            now: Duration::ZERO,
            stats: PbftStats::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// Current view.
    pub fn view(&self) -> ViewNumber {
        self.view
    }

    /// Sequence being decided.
    pub fn seq(&self) -> SeqNumber {
        self.seq
    }

    /// Last confirmed block index.
    pub fn last_confirmed(&self) -> SeqNumber {
        self.last_confirmed
    }

    /// Last confirmed block hash.
    pub fn last_confirmed_hash(&self) -> Hash {
        self.last_confirmed_hash
    }

    /// Phase flags for the current round.
    pub fn flags(&self) -> RoundFlags {
        self.flags
    }

    /// Whether a view change request is outstanding.
    pub fn is_view_changed(&self) -> bool {
        self.view_change.is_view_changed()
    }

    /// Consecutive primary-silent ticks.
    pub fn fail_count(&self) -> u32 {
        self.view_change.fail_count()
    }

    /// Whether this node is actively participating.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PbftStats {
        let mut stats = self.stats;
        stats.view_changes = self.view_change.view_changes();
        stats
    }

    /// The configuration.
    pub fn config(&self) -> &PbftConfig {
        &self.config
    }

    /// Number of unconfirmed messages held.
    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    /// Set the clock. Called by the runner before each handle.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Gate proposal/voting on peer reachability (health monitor).
    pub fn set_active(&mut self, active: bool) {
        if self.active != active {
            if active {
                info!(seq = %self.seq, "Node activated, resuming proposals and votes");
            } else {
                warn!(seq = %self.seq, "Reachable peers below quorum, node deactivated");
            }
        }
        self.active = active;
    }

    fn timestamp(&self) -> u64 {
        self.now.as_millis() as u64
    }

    fn quorum(&self) -> usize {
        self.registry.thresholds().quorum
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Round Tick
    // ═══════════════════════════════════════════════════════════════════════

    /// Drive one scheduler tick.
    ///
    /// `pending` is the transaction pool's current offering, consumed
    /// only when this node proposes. The tick always reschedules itself;
    /// when inactive it does nothing else.
    pub fn on_round_timer(&mut self, pending: Vec<Transaction>) -> Vec<Action> {
        let mut actions = vec![Action::SetTimer {
            id: TimerId::Round,
            duration: self.config.round_interval,
        }];

        if !self.active {
            trace!(seq = %self.seq, "Tick skipped, node inactive");
            return actions;
        }

        trace!(
            view = %self.view,
            seq = %self.seq,
            flags = ?self.flags,
            fail_count = self.view_change.fail_count(),
            ledger = self.ledger.len(),
            "Round tick"
        );

        // Age the prepare set by one tick before any transition runs.
        if self.flags.is_prepared && !self.flags.is_committed {
            self.prepare_ticks += 1;
        }

        // View change request, then resolution against collected votes.
        if let Some(request) = self.view_change.maybe_request(
            self.view,
            self.seq,
            self.last_confirmed_hash,
            &self.signing_key,
            self.timestamp(),
        ) {
            self.ledger.insert(request.clone());
            actions.push(Action::Multicast { message: request });
        }
        self.resolve_view();

        actions.extend(self.propose_pre_prepare(pending));

        // Primary silence: nothing proposed and nothing received.
        if self.ledger.pre_prepare_for(self.seq).is_none() {
            self.view_change.note_primary_silence();
        }

        actions.extend(self.produce_prepare());
        actions.extend(self.produce_commit(true));
        // An abandoned prepare phase re-drives within the same tick.
        actions.extend(self.produce_prepare());
        actions.extend(self.try_confirm());
        actions
    }

    /// Adopt a higher view once a quorum of view-change requests agrees.
    fn resolve_view(&mut self) {
        if let Some(new_view) = resolve_view(&self.ledger, self.view, self.seq, self.quorum()) {
            let new_primary = self.registry.primary_for(new_view);
            info!(
                seq = %self.seq,
                old_view = %self.view,
                %new_view,
                ?new_primary,
                "View change adopted, primary rotated"
            );
            self.view = new_view;
            self.view_change.on_view_adopted(new_view);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Phase Transitions
    // ═══════════════════════════════════════════════════════════════════════

    /// Propose a block if this node is the primary and has not yet.
    fn propose_pre_prepare(&mut self, pending: Vec<Transaction>) -> Vec<Action> {
        if self.flags.is_pre_prepared || !self.registry.is_local_primary(self.view) {
            return vec![];
        }

        let mut transactions = pending;
        transactions.truncate(self.config.max_block_transactions);

        let block = Block::new(
            self.seq,
            self.last_confirmed_hash,
            self.registry.local_id(),
            self.timestamp(),
            transactions,
        );
        let message = ConsensusMessage::pre_prepare(
            self.view,
            self.seq,
            block,
            &self.signing_key,
            self.timestamp(),
        );

        info!(
            view = %self.view,
            seq = %self.seq,
            block_hash = ?message.block_hash,
            "Proposing pre-prepare"
        );

        self.ledger.insert(message.clone());
        self.flags.is_pre_prepared = true;
        vec![Action::Multicast { message }]
    }

    /// Emit a prepare for the observed proposal.
    fn produce_prepare(&mut self) -> Vec<Action> {
        if !self.flags.is_pre_prepared || self.flags.is_prepared {
            return vec![];
        }
        let Some(pre_prepare) = self.ledger.pre_prepare_for(self.seq) else {
            return vec![];
        };

        let message = ConsensusMessage::prepare(
            self.view,
            self.seq,
            pre_prepare.block_hash,
            &self.signing_key,
            self.timestamp(),
        );

        debug!(view = %self.view, seq = %self.seq, "Producing prepare");

        self.ledger.insert(message.clone());
        self.flags.is_prepared = true;
        self.prepare_ticks = 0;
        vec![Action::Multicast { message }]
    }

    /// Emit a commit once a prepare quorum exists.
    ///
    /// When the tick's poll window expires with the prepare set still
    /// below quorum, the set is cleared and the prepare phase re-drives
    /// from messages received later (status merges re-deliver lost
    /// prepares), instead of letting stale partial state sit across
    /// ticks. Quorum checks triggered by message arrival (`expired` =
    /// false) never clear - the window is still open.
    fn produce_commit(&mut self, expired: bool) -> Vec<Action> {
        if !self.flags.is_prepared || self.flags.is_committed {
            return vec![];
        }
        let Some(block_hash) = self.ledger.pre_prepare_for(self.seq).map(|m| m.block_hash) else {
            return vec![];
        };

        let prepares = self
            .ledger
            .count_matching(self.seq, MessageKind::Prepare, &block_hash);
        if prepares < self.quorum() {
            if expired && self.prepare_ticks >= 1 {
                debug!(
                    seq = %self.seq,
                    prepares,
                    quorum = self.quorum(),
                    "Prepare set below quorum after poll window, abandoning prepare phase"
                );
                self.ledger.remove_kind(self.seq, MessageKind::Prepare);
                self.flags.is_prepared = false;
            }
            return vec![];
        }

        let message = ConsensusMessage::commit(
            self.view,
            self.seq,
            block_hash,
            &self.signing_key,
            self.timestamp(),
        );

        debug!(view = %self.view, seq = %self.seq, prepares, "Producing commit");

        self.ledger.insert(message.clone());
        self.flags.is_committed = true;
        vec![Action::Multicast { message }]
    }

    /// Confirm once both prepare and commit quorums exist.
    fn try_confirm(&mut self) -> Vec<Action> {
        if !self.flags.is_committed {
            return vec![];
        }
        let Some(pre_prepare) = self.ledger.pre_prepare_for(self.seq).cloned() else {
            return vec![];
        };
        let block_hash = pre_prepare.block_hash;

        let prepares = self
            .ledger
            .matching(self.seq, MessageKind::Prepare, &block_hash);
        let commits = self
            .ledger
            .matching(self.seq, MessageKind::Commit, &block_hash);
        let quorum = self.quorum();
        if prepares.len() < quorum || commits.len() < quorum {
            trace!(
                seq = %self.seq,
                prepares = prepares.len(),
                commits = commits.len(),
                quorum,
                "Quorum certificate incomplete"
            );
            return vec![];
        }

        let block = pre_prepare
            .block
            .clone()
            .expect("pre-prepare carries its block");
        let certified = CertifiedBlock {
            block,
            proof: QuorumProof {
                pre_prepare: Some(pre_prepare),
                prepares,
                commits,
            },
        };

        info!(
            seq = %self.seq,
            view = %self.view,
            block_hash = ?block_hash,
            transactions = certified.block.transactions.len(),
            "Block confirmed"
        );

        let index = certified.height();
        let actions = vec![
            Action::AppendBlock {
                block: Box::new(certified.clone()),
            },
            Action::BroadcastBlock {
                block: Box::new(certified.clone()),
            },
            Action::EnqueueInternal {
                event: Box::new(Event::BlockConfirmed {
                    index,
                    block: Box::new(certified),
                }),
            },
        ];

        self.advance_confirmed(index, block_hash);
        actions
    }

    /// Reset the round for the sequence after `index`.
    ///
    /// Called after local confirmation, after accepting a broadcast
    /// block, and for each block applied during sync. Prunes every
    /// ledger entry at or below the confirmed index.
    pub fn advance_confirmed(&mut self, index: SeqNumber, hash: Hash) {
        self.last_confirmed = index;
        self.last_confirmed_hash = hash;
        self.seq = index.next();
        self.view = ViewNumber(self.seq.0);
        self.flags = RoundFlags::default();
        self.prepare_ticks = 0;
        self.view_change.reset_round();
        self.ledger.prune_through(index);
        self.stats.confirmed_blocks += 1;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Message Receipt
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a consensus message from a peer (or a status merge).
    ///
    /// Unverifiable messages are dropped silently and never enter the
    /// ledger. A message for an already-confirmed sequence is a no-op; a
    /// message ahead of the local sequence is retained but does not
    /// advance local state. After insertion the phase transitions are
    /// re-driven, so a quorum completing mid-tick is acted on at once.
    pub fn on_message(&mut self, message: ConsensusMessage) -> Vec<Action> {
        if message.seq <= self.last_confirmed {
            trace!(
                seq = %message.seq,
                confirmed = %self.last_confirmed,
                "Dropping message for confirmed sequence"
            );
            return vec![];
        }

        let Some(key) = self.registry.public_key(message.signer) else {
            warn!(signer = ?message.signer, "Message from unknown validator");
            self.stats.rejected_messages += 1;
            return vec![];
        };
        if let Err(error) = message.verify(&key) {
            warn!(signer = ?message.signer, %error, "Dropping unverifiable message");
            self.stats.rejected_messages += 1;
            return vec![];
        }

        if !self.ledger.insert(message.clone()) {
            trace!(kind = message.kind.name(), "Duplicate message ignored");
            return vec![];
        }

        debug!(
            kind = message.kind.name(),
            view = %message.view,
            seq = %message.seq,
            signer = ?message.signer,
            "Stored consensus message"
        );

        if message.kind == MessageKind::PrePrepare && message.seq == self.seq {
            self.flags.is_pre_prepared = true;
        }

        if !self.active {
            return vec![];
        }

        // Quorum may have just completed; re-drive the transitions.
        let mut actions = self.produce_prepare();
        actions.extend(self.produce_commit(false));
        actions.extend(self.try_confirm());
        actions
    }

    /// Merge unconfirmed messages reported by a peer's status digest.
    ///
    /// The digest was already verified wholesale; each message still
    /// passes through the standard receipt path (dedup included).
    pub fn merge_messages(&mut self, messages: Vec<ConsensusMessage>) -> Vec<Action> {
        let mut actions = vec![];
        for message in messages {
            actions.extend(self.on_message(message));
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Confirmed Block Receipt
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a broadcast certified block.
    ///
    /// Accepted only when it is exactly the next index and its quorum
    /// proof verifies; being further ahead is left to the status-driven
    /// sync path.
    pub fn on_certified_block(&mut self, certified: CertifiedBlock) -> Vec<Action> {
        let index = certified.height();
        if index != self.last_confirmed.next() {
            trace!(
                %index,
                confirmed = %self.last_confirmed,
                "Ignoring broadcast block outside the next index"
            );
            return vec![];
        }
        if let Err(error) = certified.verify(&self.registry) {
            warn!(%index, %error, "Broadcast block failed proof verification");
            return vec![];
        }

        info!(%index, hash = ?certified.hash(), "Accepted broadcast certified block");

        let hash = certified.hash();
        let actions = vec![
            Action::AppendBlock {
                block: Box::new(certified.clone()),
            },
            Action::EnqueueInternal {
                event: Box::new(Event::BlockConfirmed {
                    index,
                    block: Box::new(certified),
                }),
            },
        ];
        self.advance_confirmed(index, hash);
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Status
    // ═══════════════════════════════════════════════════════════════════════

    /// Build the signed status digest for health exchanges.
    pub fn status_digest(&self) -> NodeStatus {
        NodeStatus::signed(
            self.last_confirmed,
            self.ledger.unconfirmed_for(self.seq),
            self.timestamp(),
            &self.signing_key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::test_utils::{test_keys, test_registry, test_transaction};
    use tracing_test::traced_test;

    /// A four-node bench: the state machine under test runs as `local`,
    /// the other keys play remote validators.
    fn bench(local: usize) -> (PbftState, Vec<KeyPair>) {
        let keys = test_keys(4);
        let registry = test_registry(&keys, local).into_arc();
        let mut state = PbftState::new(
            keys[local].clone(),
            registry,
            PbftConfig::default(),
            RecoveredState::genesis(),
        );
        state.set_active(true);
        (state, keys)
    }

    /// Index of the primary for seq/view 1 within `keys`.
    fn primary_index(keys: &[KeyPair]) -> usize {
        let registry = test_registry(keys, 0);
        let primary = registry.primary_for(ViewNumber(1));
        keys.iter().position(|k| k.validator_id() == primary).unwrap()
    }

    fn multicasts(actions: &[Action]) -> Vec<&ConsensusMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Multicast { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[traced_test]
    #[test]
    fn test_primary_proposes_on_tick() {
        let keys = test_keys(4);
        let (mut state, _) = bench(primary_index(&keys));

        let actions = state.on_round_timer(vec![test_transaction(1)]);
        let sent = multicasts(&actions);

        // Pre-prepare and own prepare go out in the same tick.
        assert_eq!(sent[0].kind, MessageKind::PrePrepare);
        assert_eq!(sent[1].kind, MessageKind::Prepare);
        assert!(state.flags().is_pre_prepared);
        assert!(state.flags().is_prepared);
        // Commit held back: prepare quorum is 3, only own prepare exists.
        assert!(!state.flags().is_committed);
    }

    #[traced_test]
    #[test]
    fn test_non_primary_does_not_propose() {
        let keys = test_keys(4);
        let backup = (primary_index(&keys) + 1) % 4;
        let (mut state, _) = bench(backup);

        let actions = state.on_round_timer(vec![]);
        assert!(multicasts(&actions).is_empty());
        assert!(!state.flags().is_pre_prepared);
        assert_eq!(state.fail_count(), 1);
    }

    #[traced_test]
    #[test]
    fn test_inactive_node_only_reschedules() {
        let keys = test_keys(4);
        let (mut state, _) = bench(primary_index(&keys));
        state.set_active(false);

        let actions = state.on_round_timer(vec![]);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::SetTimer { id: TimerId::Round, .. }));
        assert_eq!(state.fail_count(), 0);
    }

    #[traced_test]
    #[test]
    fn test_full_round_confirms_at_quorum() {
        let keys = test_keys(4);
        let leader = primary_index(&keys);
        let (mut state, _) = bench(leader);

        // Tick 1: propose + prepare.
        let actions = state.on_round_timer(vec![test_transaction(1)]);
        let block_hash = multicasts(&actions)[0].block_hash;

        // Two remote prepares arrive: quorum of 3 with our own.
        for other in (0..4).filter(|&i| i != leader).take(2) {
            state.on_message(ConsensusMessage::prepare(
                ViewNumber(1),
                SeqNumber(1),
                block_hash,
                &keys[other],
                7,
            ));
        }
        assert!(state.flags().is_committed, "commit should fire on quorum arrival");

        // Two remote commits: commit quorum completes, block confirms.
        let mut confirm_actions = vec![];
        for other in (0..4).filter(|&i| i != leader).take(2) {
            confirm_actions = state.on_message(ConsensusMessage::commit(
                ViewNumber(1),
                SeqNumber(1),
                block_hash,
                &keys[other],
                8,
            ));
        }

        assert!(confirm_actions
            .iter()
            .any(|a| matches!(a, Action::AppendBlock { .. })));
        assert!(confirm_actions
            .iter()
            .any(|a| matches!(a, Action::BroadcastBlock { .. })));
        assert_eq!(state.last_confirmed(), SeqNumber(1));
        assert_eq!(state.seq(), SeqNumber(2));
        assert_eq!(state.view(), ViewNumber(2));
        assert!(!state.flags().is_pre_prepared);
        assert_eq!(state.ledger_len(), 0, "confirmed seq pruned in bulk");
    }

    #[traced_test]
    #[test]
    fn test_confirmed_block_carries_quorum_proof() {
        let keys = test_keys(4);
        let leader = primary_index(&keys);
        let (mut state, _) = bench(leader);

        let actions = state.on_round_timer(vec![test_transaction(1)]);
        let block_hash = multicasts(&actions)[0].block_hash;

        let mut last = vec![];
        for other in (0..4).filter(|&i| i != leader).take(2) {
            state.on_message(ConsensusMessage::prepare(
                ViewNumber(1),
                SeqNumber(1),
                block_hash,
                &keys[other],
                7,
            ));
            last = state.on_message(ConsensusMessage::commit(
                ViewNumber(1),
                SeqNumber(1),
                block_hash,
                &keys[other],
                8,
            ));
        }

        let registry = test_registry(&keys, 0);
        let appended = last
            .iter()
            .find_map(|a| match a {
                Action::AppendBlock { block } => Some(block.clone()),
                _ => None,
            })
            .expect("confirmation appends the block");
        assert!(appended.verify(&registry).is_ok());
        assert!(appended.proof.prepares.len() >= 3);
        assert!(appended.proof.commits.len() >= 3);
    }

    #[traced_test]
    #[test]
    fn test_prepare_with_foreign_hash_never_counts() {
        let keys = test_keys(4);
        let leader = primary_index(&keys);
        let (mut state, _) = bench(leader);

        let actions = state.on_round_timer(vec![]);
        let block_hash = multicasts(&actions)[0].block_hash;

        // One honest prepare, one referencing a hash that matches no
        // known pre-prepare. 2 honest + 1 foreign != quorum.
        let others: Vec<usize> = (0..4).filter(|&i| i != leader).collect();
        state.on_message(ConsensusMessage::prepare(
            ViewNumber(1),
            SeqNumber(1),
            block_hash,
            &keys[others[0]],
            7,
        ));
        state.on_message(ConsensusMessage::prepare(
            ViewNumber(1),
            SeqNumber(1),
            Hash::of(b"unrelated"),
            &keys[others[1]],
            7,
        ));

        assert!(!state.flags().is_committed);
        // The foreign message is retained, not dropped.
        assert_eq!(state.ledger_len(), 4);
    }

    #[traced_test]
    #[test]
    fn test_stale_message_is_dropped() {
        let (mut state, keys) = bench(0);
        state.advance_confirmed(SeqNumber(3), Hash::of(b"h3"));

        let stale =
            ConsensusMessage::prepare(ViewNumber(2), SeqNumber(2), Hash::of(b"x"), &keys[1], 1);
        assert!(state.on_message(stale).is_empty());
        assert_eq!(state.ledger_len(), 0);
    }

    #[traced_test]
    #[test]
    fn test_future_message_is_retained_without_advancing() {
        let (mut state, keys) = bench(0);
        let future =
            ConsensusMessage::prepare(ViewNumber(9), SeqNumber(9), Hash::of(b"x"), &keys[1], 1);
        state.on_message(future);
        assert_eq!(state.ledger_len(), 1);
        assert_eq!(state.seq(), SeqNumber(1));
        assert!(!state.flags().is_prepared);
    }

    #[traced_test]
    #[test]
    fn test_bad_signature_never_enters_ledger() {
        let (mut state, keys) = bench(0);
        let mut message =
            ConsensusMessage::prepare(ViewNumber(1), SeqNumber(1), Hash::of(b"x"), &keys[1], 1);
        message.timestamp += 1; // invalidates the signature
        state.on_message(message);
        assert_eq!(state.ledger_len(), 0);
        assert_eq!(state.stats().rejected_messages, 1);
    }

    #[traced_test]
    #[test]
    fn test_view_change_after_threshold_and_quorum() {
        let keys = test_keys(4);
        let leader = primary_index(&keys);
        let backup = (leader + 1) % 4;
        let (mut state, _) = bench(backup);

        // Two silent ticks reach the default threshold; the third emits
        // the request.
        state.on_round_timer(vec![]);
        state.on_round_timer(vec![]);
        let actions = state.on_round_timer(vec![]);
        let sent = multicasts(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::ViewChange);
        assert_eq!(sent[0].view, ViewNumber(2));
        assert!(state.is_view_changed());

        // Two more requests complete the quorum; next tick adopts.
        for other in (0..4).filter(|&i| i != backup).take(2) {
            state.on_message(ConsensusMessage::view_change(
                ViewNumber(2),
                SeqNumber(1),
                state.last_confirmed_hash(),
                &keys[other],
                5,
            ));
        }
        state.on_round_timer(vec![]);
        assert_eq!(state.view(), ViewNumber(2));
        assert_eq!(state.stats().view_changes, 1);
        // Failure tracking restarted on adoption; at most the silence of
        // this same tick has been counted since.
        assert!(state.fail_count() <= 1);
    }

    #[traced_test]
    #[test]
    fn test_insufficient_prepare_set_is_cleared_and_redriven() {
        let keys = test_keys(4);
        let leader = primary_index(&keys);
        let (mut state, _) = bench(leader);

        // Propose; own prepare exists, quorum does not.
        state.on_round_timer(vec![]);
        assert!(state.flags().is_prepared);

        // The commit attempt on the next tick abandons the prepare phase
        // and immediately re-emits a fresh prepare.
        state.set_time(Duration::from_secs(5));
        state.on_round_timer(vec![]);
        assert!(state.flags().is_prepared, "prepare phase re-driven");
        assert!(!state.flags().is_committed);
        assert_eq!(
            state
                .ledger
                .messages_for(SeqNumber(1), MessageKind::Prepare)
                .len(),
            1,
            "only the fresh prepare remains"
        );
    }

    #[traced_test]
    #[test]
    fn test_broadcast_block_fast_path() {
        let keys = test_keys(4);
        let (mut state, _) = bench(0);
        let registry = test_registry(&keys, 0);

        // Build a block certified by 3 of 4 validators.
        let block = Block::new(
            SeqNumber(1),
            state.last_confirmed_hash(),
            keys[1].validator_id(),
            1,
            vec![],
        );
        let hash = block.hash();
        let pre_prepare =
            ConsensusMessage::pre_prepare(ViewNumber(1), SeqNumber(1), block.clone(), &keys[1], 1);
        let certified = CertifiedBlock {
            block,
            proof: QuorumProof {
                pre_prepare: Some(pre_prepare),
                prepares: keys[..3]
                    .iter()
                    .map(|k| ConsensusMessage::prepare(ViewNumber(1), SeqNumber(1), hash, k, 2))
                    .collect(),
                commits: keys[..3]
                    .iter()
                    .map(|k| ConsensusMessage::commit(ViewNumber(1), SeqNumber(1), hash, k, 3))
                    .collect(),
            },
        };
        assert!(certified.verify(&registry).is_ok());

        let actions = state.on_certified_block(certified.clone());
        assert!(actions.iter().any(|a| matches!(a, Action::AppendBlock { .. })));
        assert_eq!(state.last_confirmed(), SeqNumber(1));

        // Same block again: no longer the next index, ignored.
        assert!(state.on_certified_block(certified).is_empty());
    }

    #[traced_test]
    #[test]
    fn test_status_digest_reflects_round() {
        let keys = test_keys(4);
        let leader = primary_index(&keys);
        let (mut state, _) = bench(leader);
        let registry = test_registry(&keys, 0);

        state.on_round_timer(vec![]);
        let status = state.status_digest();
        assert!(status.verify(&registry));
        assert_eq!(status.last_confirmed, SeqNumber(0));
        // Own pre-prepare and prepare are reported.
        assert_eq!(status.unconfirmed.len(), 2);
    }
}
