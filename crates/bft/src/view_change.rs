//! View change component for liveness.
//!
//! Tracks consecutive primary-silent ticks and, past the threshold,
//! emits a VIEW_CHANGE message for `view + 1`. View adoption is a
//! quorum-of-quorums decision: the view only moves once a quorum of
//! VIEW_CHANGE messages exists for the sequence *and* a single higher
//! view is endorsed by a quorum of distinct signers. A lone faulty node
//! can therefore never force a view bump.
//!
//! View change is best-effort liveness recovery, not safety-critical:
//! a delayed or ignored view change only delays progress, because
//! confirmation is gated on quorum certificates independent of the view
//! that produced them.

use crate::MessageLedger;
use palisade_types::{
    ConsensusMessage, Hash, KeyPair, MessageKind, SeqNumber, ValidatorId, ViewNumber,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Failure tracking and view-change emission for the current round.
#[derive(Debug)]
pub struct ViewChangeState {
    /// Ticks-without-a-proposal threshold that triggers a request.
    fail_threshold: u32,

    /// Consecutive ticks that observed no pre-prepare for the current seq.
    fail_count: u32,

    /// The view we last emitted a VIEW_CHANGE for, if any. Guards against
    /// flooding the ledger with one fresh request per tick.
    requested_view: Option<ViewNumber>,

    /// Total adopted view changes (statistics).
    view_changes: u64,
}

impl ViewChangeState {
    /// Create with a fail threshold.
    pub fn new(fail_threshold: u32) -> Self {
        Self {
            fail_threshold,
            fail_count: 0,
            requested_view: None,
            view_changes: 0,
        }
    }

    /// Current consecutive failure count.
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    /// Whether a view change request is outstanding for this round.
    pub fn is_view_changed(&self) -> bool {
        self.requested_view.is_some()
    }

    /// Total adopted view changes.
    pub fn view_changes(&self) -> u64 {
        self.view_changes
    }

    /// Record a tick that saw no pre-prepare for the current sequence.
    pub fn note_primary_silence(&mut self) {
        self.fail_count += 1;
        debug!(fail_count = self.fail_count, "No pre-prepare observed this tick");
    }

    /// Emit a VIEW_CHANGE for `view + 1` once the threshold is reached.
    ///
    /// Returns at most one message per target view; the caller stores it
    /// in the ledger and multicasts it.
    pub fn maybe_request(
        &mut self,
        view: ViewNumber,
        seq: SeqNumber,
        last_confirmed_hash: Hash,
        key: &KeyPair,
        timestamp: u64,
    ) -> Option<ConsensusMessage> {
        if self.fail_count < self.fail_threshold {
            return None;
        }

        let new_view = view.next();
        if self.requested_view == Some(new_view) {
            return None;
        }
        self.requested_view = Some(new_view);

        warn!(
            %seq,
            current_view = %view,
            %new_view,
            fail_count = self.fail_count,
            "Primary silent past threshold, requesting view change"
        );

        Some(ConsensusMessage::view_change(
            new_view,
            seq,
            last_confirmed_hash,
            key,
            timestamp,
        ))
    }

    /// A higher view was adopted; failure tracking restarts.
    pub fn on_view_adopted(&mut self, new_view: ViewNumber) {
        self.fail_count = 0;
        self.view_changes += 1;
        info!(%new_view, total = self.view_changes, "Adopted view change");
    }

    /// A block was confirmed (or sync completed); the round restarts.
    pub fn reset_round(&mut self) {
        self.fail_count = 0;
        self.requested_view = None;
    }
}

/// Resolve the view for a sequence from collected VIEW_CHANGE messages.
///
/// Two quorum gates, per the quorum-of-quorums rule:
/// 1. fewer than `quorum` VIEW_CHANGE messages total for the sequence
///    means the view does not move at all;
/// 2. among views above `current`, only one endorsed by ≥ `quorum`
///    *distinct signers* can win, and the largest such view is chosen.
///
/// Counting distinct signers (rather than raw messages) means a signer
/// re-emitting the same request with fresh timestamps still counts once.
pub fn resolve_view(
    ledger: &MessageLedger,
    current: ViewNumber,
    seq: SeqNumber,
    quorum: usize,
) -> Option<ViewNumber> {
    let requests = ledger.messages_for(seq, MessageKind::ViewChange);
    if requests.len() < quorum {
        return None;
    }

    // view -> distinct signers endorsing it
    let mut endorsements: HashMap<ViewNumber, Vec<ValidatorId>> = HashMap::new();
    for request in &requests {
        if request.view <= current {
            continue;
        }
        let signers = endorsements.entry(request.view).or_default();
        if !signers.contains(&request.signer) {
            signers.push(request.signer);
        }
    }

    let winner = endorsements
        .into_iter()
        .filter(|(_, signers)| signers.len() >= quorum)
        .map(|(view, _)| view)
        .max()?;

    debug!(%seq, old_view = %current, new_view = %winner, "View change quorum resolved");
    Some(winner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::test_utils::test_keys;
    use tracing_test::traced_test;

    fn request(ledger: &mut MessageLedger, signer: usize, view: u64, seq: u64, ts: u64) {
        let keys = test_keys(4);
        let msg = ConsensusMessage::view_change(
            ViewNumber(view),
            SeqNumber(seq),
            Hash::ZERO,
            &keys[signer],
            ts,
        );
        ledger.insert(msg);
    }

    #[traced_test]
    #[test]
    fn test_request_only_past_threshold() {
        let mut state = ViewChangeState::new(2);
        let keys = test_keys(4);

        assert!(state
            .maybe_request(ViewNumber(1), SeqNumber(1), Hash::ZERO, &keys[0], 0)
            .is_none());

        state.note_primary_silence();
        state.note_primary_silence();
        let msg = state
            .maybe_request(ViewNumber(1), SeqNumber(1), Hash::ZERO, &keys[0], 0)
            .expect("threshold reached");
        assert_eq!(msg.kind, MessageKind::ViewChange);
        assert_eq!(msg.view, ViewNumber(2));

        // Same target view is requested once, even if ticks keep failing.
        state.note_primary_silence();
        assert!(state
            .maybe_request(ViewNumber(1), SeqNumber(1), Hash::ZERO, &keys[0], 1)
            .is_none());
    }

    #[traced_test]
    #[test]
    fn test_resolution_needs_total_quorum() {
        let mut ledger = MessageLedger::new();
        request(&mut ledger, 0, 2, 1, 0);
        request(&mut ledger, 1, 2, 1, 0);
        assert_eq!(resolve_view(&ledger, ViewNumber(1), SeqNumber(1), 3), None);

        request(&mut ledger, 2, 2, 1, 0);
        assert_eq!(
            resolve_view(&ledger, ViewNumber(1), SeqNumber(1), 3),
            Some(ViewNumber(2))
        );
    }

    #[traced_test]
    #[test]
    fn test_resolution_needs_per_view_quorum() {
        // Three requests exist, but they split across views 2 and 3:
        // neither reaches its own quorum, so the view holds.
        let mut ledger = MessageLedger::new();
        request(&mut ledger, 0, 2, 1, 0);
        request(&mut ledger, 1, 2, 1, 0);
        request(&mut ledger, 2, 3, 1, 0);
        assert_eq!(resolve_view(&ledger, ViewNumber(1), SeqNumber(1), 3), None);
    }

    #[traced_test]
    #[test]
    fn test_one_signer_cannot_inflate_a_view() {
        // The same signer re-emitting with fresh timestamps counts once.
        let mut ledger = MessageLedger::new();
        request(&mut ledger, 0, 2, 1, 0);
        request(&mut ledger, 0, 2, 1, 1);
        request(&mut ledger, 0, 2, 1, 2);
        assert_eq!(resolve_view(&ledger, ViewNumber(1), SeqNumber(1), 3), None);
    }

    #[traced_test]
    #[test]
    fn test_largest_endorsed_view_wins() {
        let mut ledger = MessageLedger::new();
        for signer in 0..3 {
            request(&mut ledger, signer, 2, 1, 0);
        }
        for signer in 0..3 {
            request(&mut ledger, signer, 4, 1, 0);
        }
        assert_eq!(
            resolve_view(&ledger, ViewNumber(1), SeqNumber(1), 3),
            Some(ViewNumber(4))
        );
    }

    #[traced_test]
    #[test]
    fn test_views_at_or_below_current_are_ignored() {
        let mut ledger = MessageLedger::new();
        for signer in 0..4 {
            request(&mut ledger, signer, 1, 1, 0);
        }
        assert_eq!(resolve_view(&ledger, ViewNumber(1), SeqNumber(1), 3), None);
    }
}
