//! The in-memory ledger of not-yet-confirmed consensus messages.

use palisade_types::{ConsensusMessage, Hash, MessageKind, SeqNumber};
use std::collections::BTreeMap;

/// Unconfirmed messages, keyed by signature hex.
///
/// The signature is the dedup key across the whole system: two
/// structurally equal messages from the same signer carry the same
/// signature and collapse to a single entry. The map is ordered so
/// iteration (and therefore proof assembly and status digests) is
/// deterministic across nodes.
///
/// Entries accumulate within a round and are pruned in bulk once their
/// sequence number is confirmed.
#[derive(Debug, Default)]
pub struct MessageLedger {
    messages: BTreeMap<String, ConsensusMessage>,
}

impl MessageLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a verified message. Returns `false` on a duplicate.
    pub fn insert(&mut self, message: ConsensusMessage) -> bool {
        let key = message.signature_hex();
        if self.messages.contains_key(&key) {
            return false;
        }
        self.messages.insert(key, message);
        true
    }

    /// Whether a message with this signature is present.
    pub fn contains(&self, signature_hex: &str) -> bool {
        self.messages.contains_key(signature_hex)
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The pre-prepare for a sequence, if any.
    ///
    /// When duplicates exist (a faulty primary double-proposing), the
    /// first in signature order wins on every node, so all nodes pick
    /// the same one.
    pub fn pre_prepare_for(&self, seq: SeqNumber) -> Option<&ConsensusMessage> {
        self.messages
            .values()
            .find(|m| m.kind == MessageKind::PrePrepare && m.seq == seq)
    }

    /// All messages of `kind` for a sequence.
    pub fn messages_for(&self, seq: SeqNumber, kind: MessageKind) -> Vec<&ConsensusMessage> {
        self.messages
            .values()
            .filter(|m| m.kind == kind && m.seq == seq)
            .collect()
    }

    /// Messages of `kind` for a sequence that endorse `hash`, one per
    /// signer.
    ///
    /// A message carrying a hash that matches no known proposal is
    /// retained in the ledger but never returned here. A signer that
    /// re-emitted the same endorsement with a fresh timestamp counts
    /// once: the first entry in signature order wins, which is the same
    /// entry on every node.
    pub fn matching(&self, seq: SeqNumber, kind: MessageKind, hash: &Hash) -> Vec<ConsensusMessage> {
        let mut seen = std::collections::HashSet::new();
        self.messages
            .values()
            .filter(|m| m.kind == kind && m.seq == seq && m.block_hash == *hash)
            .filter(|m| seen.insert(m.signer))
            .cloned()
            .collect()
    }

    /// Count of distinct signers of `kind` for a sequence endorsing `hash`.
    pub fn count_matching(&self, seq: SeqNumber, kind: MessageKind, hash: &Hash) -> usize {
        let mut seen = std::collections::HashSet::new();
        self.messages
            .values()
            .filter(|m| m.kind == kind && m.seq == seq && m.block_hash == *hash)
            .filter(|m| seen.insert(m.signer))
            .count()
    }

    /// Remove all messages of `kind` for a sequence.
    ///
    /// Used to clear a below-quorum prepare set so the phase can be
    /// re-driven from messages received later, instead of accumulating
    /// stale partial state across ticks.
    pub fn remove_kind(&mut self, seq: SeqNumber, kind: MessageKind) -> usize {
        let before = self.messages.len();
        self.messages.retain(|_, m| !(m.kind == kind && m.seq == seq));
        before - self.messages.len()
    }

    /// Bulk-evict everything at or below a confirmed sequence.
    pub fn prune_through(&mut self, confirmed: SeqNumber) {
        self.messages.retain(|_, m| m.seq > confirmed);
    }

    /// Snapshot of all messages for a sequence, for the status digest.
    pub fn unconfirmed_for(&self, seq: SeqNumber) -> Vec<ConsensusMessage> {
        self.messages
            .values()
            .filter(|m| m.seq == seq)
            .cloned()
            .collect()
    }
}
