//! Catch-up synchronization of confirmed blocks.
//!
//! When a status exchange reports a peer ahead of the local confirmed
//! index, the missing range is fetched in pages and every block's
//! quorum proof is verified before anything is applied. Verification
//! failure discards the *entire* fetched batch and aborts the job - an
//! unverified chain suffix is never partially applied. The chase after
//! a still-advancing peer is an explicit bounded loop, capped by
//! `max_sync_rounds`.

use palisade_core::Action;
use palisade_types::{CertifiedBlock, Hash, SeqNumber, ValidatorId, ValidatorRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An in-flight catch-up job.
#[derive(Debug, Clone)]
struct SyncJob {
    /// The peer being synced from.
    peer: ValidatorId,
    /// The confirmed index the peer reported.
    target: SeqNumber,
    /// Fetch rounds spent so far.
    rounds: u32,
}

/// Result of processing one fetched batch.
#[derive(Debug, Default)]
pub struct SyncStep {
    /// Follow-up actions (next page fetch, appends).
    pub actions: Vec<Action>,
    /// Verified blocks to apply, in order.
    pub applied: Vec<CertifiedBlock>,
    /// Set when the job finished at this index.
    pub completed: Option<SeqNumber>,
}

/// The block syncer.
pub struct SyncState {
    registry: Arc<ValidatorRegistry>,
    page_size: usize,
    max_rounds: u32,
    job: Option<SyncJob>,
}

impl std::fmt::Debug for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncState").field("job", &self.job).finish()
    }
}

impl SyncState {
    /// Create a syncer.
    pub fn new(registry: Arc<ValidatorRegistry>, page_size: usize, max_rounds: u32) -> Self {
        Self {
            registry,
            page_size,
            max_rounds,
            job: None,
        }
    }

    /// Whether a catch-up job is in flight.
    pub fn is_syncing(&self) -> bool {
        self.job.is_some()
    }

    /// The current sync target, if any.
    pub fn target(&self) -> Option<SeqNumber> {
        self.job.as_ref().map(|j| j.target)
    }

    /// A peer reported a higher confirmed index; start (or extend) a job.
    pub fn on_peer_ahead(
        &mut self,
        peer: ValidatorId,
        target: SeqNumber,
        local_last: SeqNumber,
    ) -> Vec<Action> {
        if target <= local_last {
            return vec![];
        }

        if let Some(job) = &mut self.job {
            // Already chasing: only stretch the same peer's target.
            if job.peer == peer && target > job.target {
                debug!(?peer, old = %job.target, new = %target, "Sync target extended");
                job.target = target;
            }
            return vec![];
        }

        info!(?peer, %target, local = %local_last, "Starting block sync");
        self.job = Some(SyncJob {
            peer,
            target,
            rounds: 0,
        });
        vec![Action::FetchBlockRange {
            peer,
            from: local_last.next(),
            count: self.page_size,
        }]
    }

    /// A fetched batch arrived; verify it atomically and plan the next
    /// step.
    ///
    /// `local_last`/`local_hash` are the confirmed tip *before* this
    /// batch. Each block must continue the chain (sequential index,
    /// matching parent hash) and carry a valid quorum proof; the first
    /// failure discards the whole batch and aborts the job for a later
    /// tick to retry.
    pub fn on_block_range(
        &mut self,
        peer: ValidatorId,
        blocks: Vec<CertifiedBlock>,
        local_last: SeqNumber,
        local_hash: Hash,
    ) -> SyncStep {
        let Some(job) = self.job.clone() else {
            return SyncStep::default();
        };
        if job.peer != peer {
            debug!(?peer, "Ignoring block range from a peer we are not syncing with");
            return SyncStep::default();
        }

        if blocks.is_empty() {
            warn!(?peer, "Sync peer returned an empty range, aborting");
            self.job = None;
            return SyncStep::default();
        }

        // Verify the entire batch before applying any of it.
        let mut expected = local_last.next();
        let mut parent = local_hash;
        for block in &blocks {
            if block.height() != expected {
                warn!(
                    ?peer,
                    got = %block.height(),
                    %expected,
                    "Non-sequential sync batch, discarding"
                );
                self.job = None;
                return SyncStep::default();
            }
            if block.block.header.prev_hash != parent {
                warn!(?peer, height = %block.height(), "Sync batch breaks the hash chain, discarding");
                self.job = None;
                return SyncStep::default();
            }
            if let Err(error) = block.verify(&self.registry) {
                warn!(
                    ?peer,
                    height = %block.height(),
                    %error,
                    "Sync batch failed proof verification, discarding"
                );
                self.job = None;
                return SyncStep::default();
            }
            expected = expected.next();
            parent = block.hash();
        }

        let new_last = blocks.last().expect("batch is non-empty").height();
        let mut step = SyncStep {
            actions: blocks
                .iter()
                .map(|block| Action::AppendBlock {
                    block: Box::new(block.clone()),
                })
                .collect(),
            applied: blocks,
            completed: None,
        };

        if new_last < job.target {
            if job.rounds + 1 >= self.max_rounds {
                warn!(
                    ?peer,
                    target = %job.target,
                    reached = %new_last,
                    rounds = job.rounds + 1,
                    "Sync round budget exhausted, giving up until the next status exchange"
                );
                self.job = None;
            } else {
                self.job = Some(SyncJob {
                    rounds: job.rounds + 1,
                    ..job
                });
                step.actions.push(Action::FetchBlockRange {
                    peer,
                    from: new_last.next(),
                    count: self.page_size,
                });
            }
        } else {
            info!(?peer, index = %new_last, "Sync complete");
            self.job = None;
            step.completed = Some(new_last);
        }

        step
    }

    /// The transport failed to fetch; abort and retry on a later tick.
    pub fn on_fetch_failed(&mut self, peer: ValidatorId) {
        if self.job.as_ref().is_some_and(|j| j.peer == peer) {
            warn!(?peer, "Sync fetch failed, aborting job");
            self.job = None;
        }
    }
}
