//! Production runner: tokio I/O around the deterministic node.
//!
//! The state machine stays synchronous; this runner owns the event
//! channel, the timers, the transport, and the ledger store. Network
//! sends are spawned *after* the state machine has recorded its own
//! decision, and their results come back as events - the runner never
//! mutates consensus state directly.

use crate::metrics::metrics;
use crate::timers::TimerManager;
use crate::transport::Transport;
use palisade_core::{Action, Event, StateMachine};
use palisade_node::{NodeSnapshot, NodeStateMachine};
use palisade_types::{LedgerStore, NodeStatus, ValidatorIdentity};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Event channel depth. Inbound network traffic backs off when full.
const EVENT_CHANNEL_DEPTH: usize = 1024;

/// Caches the server side reads without touching the state machine.
///
/// Refreshed by the runner after every handled event; the transport
/// server answers status exchanges from here.
pub struct SharedState {
    status: RwLock<NodeStatus>,
    snapshot: RwLock<NodeSnapshot>,
    start: Instant,
}

impl SharedState {
    fn new(status: NodeStatus, snapshot: NodeSnapshot) -> Self {
        Self {
            status: RwLock::new(status),
            snapshot: RwLock::new(snapshot),
            start: Instant::now(),
        }
    }

    /// The node's current signed status digest.
    pub fn status(&self) -> NodeStatus {
        self.status.read().clone()
    }

    /// The node's current observability snapshot.
    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshot.read().clone()
    }

    /// Milliseconds since runner start (pong timestamps).
    pub fn timestamp_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn refresh(&self, status: NodeStatus, snapshot: NodeSnapshot) {
        *self.status.write() = status;
        *self.snapshot.write() = snapshot;
    }
}

/// Drives one validator node against real time, network, and storage.
pub struct ProductionRunner<T: Transport> {
    node: NodeStateMachine,
    transport: Arc<T>,
    store: Arc<dyn LedgerStore>,
    event_tx: mpsc::Sender<Event>,
    event_rx: mpsc::Receiver<Event>,
    /// Internal events loop back ahead of external ones.
    internal: VecDeque<Event>,
    timers: TimerManager,
    shared: Arc<SharedState>,
    start: Instant,
}

impl<T: Transport> ProductionRunner<T> {
    /// Create a runner around a node.
    pub fn new(node: NodeStateMachine, transport: Arc<T>, store: Arc<dyn LedgerStore>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let timers = TimerManager::new(event_tx.clone());
        let shared = Arc::new(SharedState::new(
            node.pbft().status_digest(),
            node.snapshot(),
        ));
        Self {
            node,
            transport,
            store,
            event_tx,
            event_rx,
            internal: VecDeque::new(),
            timers,
            shared,
            start: Instant::now(),
        }
    }

    /// Sender for inbound events (transport server, client submissions).
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.event_tx.clone()
    }

    /// The caches the transport server answers from.
    pub fn shared(&self) -> Arc<SharedState> {
        self.shared.clone()
    }

    /// Run until the event channel closes.
    pub async fn run(mut self) {
        let actions = self.node.start();
        self.dispatch(actions);
        self.refresh();

        loop {
            let event = match self.internal.pop_front() {
                Some(event) => event,
                None => match self.event_rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            trace!(event = event.type_name(), "Handling event");
            self.node.set_time(self.start.elapsed());
            let actions = self.node.handle(event);
            self.dispatch(actions);
            self.refresh();
        }
        self.timers.cancel_all();
    }

    fn refresh(&self) {
        let snapshot = self.node.snapshot();
        let stats = self.node.pbft().stats();
        metrics().observe_snapshot(&snapshot, stats.view_changes, stats.rejected_messages);
        self.shared
            .refresh(self.node.pbft().status_digest(), snapshot);
    }

    fn dispatch(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SetTimer { id, duration } => self.timers.set_timer(id, duration),
                Action::CancelTimer { id } => self.timers.cancel_timer(id),

                Action::EnqueueInternal { event } => self.internal.push_back(*event),

                Action::Multicast { message } => {
                    metrics().messages_sent.inc();
                    for peer in self.peers() {
                        let transport = self.transport.clone();
                        let message = message.clone();
                        tokio::spawn(async move {
                            if let Err(error) = transport.send_message(&peer, message).await {
                                debug!(peer = ?peer.validator_id, %error, "Multicast send failed");
                            }
                        });
                    }
                }

                Action::BroadcastBlock { block } => {
                    for peer in self.peers() {
                        let transport = self.transport.clone();
                        let block = (*block).clone();
                        tokio::spawn(async move {
                            if let Err(error) = transport.send_block(&peer, block).await {
                                debug!(peer = ?peer.validator_id, %error, "Block broadcast failed");
                            }
                        });
                    }
                }

                Action::PingPeer { peer, nonce } => {
                    let Some(identity) = self.node.registry().identity(peer).cloned() else {
                        continue;
                    };
                    let transport = self.transport.clone();
                    let event_tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        let event = match transport.ping(&identity, nonce).await {
                            Ok(_) => Event::PongReceived { peer, nonce },
                            Err(error) => {
                                trace!(?peer, %error, "Ping failed");
                                Event::PingFailed { peer }
                            }
                        };
                        let _ = event_tx.send(event).await;
                    });
                }

                Action::ExchangeStatus { peer, status } => {
                    let Some(identity) = self.node.registry().identity(peer).cloned() else {
                        continue;
                    };
                    let transport = self.transport.clone();
                    let event_tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        match transport.exchange_status(&identity, *status).await {
                            Ok(reply) => {
                                let _ = event_tx
                                    .send(Event::StatusReceived { peer, status: reply })
                                    .await;
                            }
                            Err(error) => {
                                // The next health tick retries.
                                debug!(?peer, %error, "Status exchange failed");
                            }
                        }
                    });
                }

                Action::FetchBlockRange { peer, from, count } => {
                    let Some(identity) = self.node.registry().identity(peer).cloned() else {
                        continue;
                    };
                    let transport = self.transport.clone();
                    let event_tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        let event = match transport.get_block_range(&identity, from, count).await {
                            Ok(blocks) => Event::BlockRangeReceived { peer, from, blocks },
                            Err(error) => {
                                warn!(?peer, %error, "Block range fetch failed");
                                Event::BlockRangeFailed { peer }
                            }
                        };
                        let _ = event_tx.send(event).await;
                    });
                }

                Action::AppendBlock { block } => {
                    if let Err(error) = self.store.append(*block) {
                        // A broadcast block racing local confirmation
                        // shows up as a duplicate append.
                        error!(%error, "Ledger append rejected");
                    }
                }
            }
        }
    }

    fn peers(&self) -> Vec<ValidatorIdentity> {
        self.node.registry().peers().cloned().collect()
    }
}
