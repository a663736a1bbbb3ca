//! Deterministic simulation runner.
//!
//! Each node has its own in-memory ledger store. Events are processed
//! in a total order (time, priority, insertion sequence), network
//! conditions come from a seeded RNG, and all action execution is
//! synchronous - given the same seed, a run produces identical results
//! every time.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::storage::SimStorage;
use crate::NodeIndex;
use palisade_bft::{PbftConfig, RecoveredState};
use palisade_core::{Action, Event, StateMachine, TimerId};
use palisade_node::NodeStateMachine;
use palisade_types::{
    KeyPair, LedgerStore, Transaction, ValidatorId, ValidatorIdentity, ValidatorRegistry,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{info, trace, warn};

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages sent (successfully scheduled for delivery).
    pub messages_sent: u64,
    /// Messages dropped (partition or packet loss).
    pub messages_dropped: u64,
    /// Timers set.
    pub timers_set: u64,
}

impl SimulationStats {
    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped;
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Deterministic simulation runner.
///
/// Drives a full validator set of [`NodeStateMachine`]s through
/// simulated time, executing their actions against a simulated network
/// and per-node storage.
pub struct SimulationRunner {
    /// All nodes, indexed by NodeIndex.
    nodes: Vec<NodeStateMachine>,

    /// Per-node ledger store (independent validators share nothing).
    node_storage: Vec<SimStorage>,

    /// Validator address → node index, for routing actions.
    index_of: HashMap<ValidatorId, NodeIndex>,

    /// Signing keys by node index (exposed for test scenarios).
    keys: Vec<KeyPair>,

    /// Global event queue in deterministic total order.
    event_queue: BTreeMap<EventKey, (NodeIndex, Event)>,

    /// Timer registry for cancellation/replacement.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    /// Insertion sequence for the total order.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    /// Network simulator.
    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: rand_chacha::ChaCha8Rng,

    /// Statistics.
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a runner with the default consensus configuration.
    pub fn new(network_config: NetworkConfig, seed: u64) -> Self {
        Self::with_pbft_config(network_config, PbftConfig::default(), seed)
    }

    /// Create a runner with an explicit consensus configuration.
    pub fn with_pbft_config(
        network_config: NetworkConfig,
        pbft_config: PbftConfig,
        seed: u64,
    ) -> Self {
        use rand::SeedableRng;

        let num_validators = network_config.num_validators;
        let network = SimulatedNetwork::new(network_config);
        let rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);

        // Deterministic per-validator keys derived from the seed.
        let keys: Vec<KeyPair> = (0..num_validators)
            .map(|i| {
                let mut seed_bytes = [0u8; 32];
                let key_seed = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
                seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
                seed_bytes[8..16].copy_from_slice(&(i as u64).to_le_bytes());
                KeyPair::from_seed(&seed_bytes)
            })
            .collect();

        let identities: Vec<ValidatorIdentity> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| ValidatorIdentity::new(k.public_key(), "127.0.0.1", 7000 + i as u16))
            .collect();

        let index_of: HashMap<ValidatorId, NodeIndex> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.validator_id(), i as NodeIndex))
            .collect();

        let nodes: Vec<NodeStateMachine> = keys
            .iter()
            .map(|key| {
                let registry = ValidatorRegistry::new(key.validator_id(), identities.clone())
                    .expect("simulation validator set is well-formed")
                    .into_arc();
                NodeStateMachine::new(
                    key.clone(),
                    registry,
                    pbft_config.clone(),
                    RecoveredState::genesis(),
                )
            })
            .collect();

        let node_storage = (0..nodes.len()).map(|_| SimStorage::new()).collect();

        info!(num_validators, seed, "Created simulation runner");

        Self {
            nodes,
            node_storage,
            index_of,
            keys,
            event_queue: BTreeMap::new(),
            timers: HashMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network,
            rng,
            stats: SimulationStats::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Simulation statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// A node by index.
    pub fn node(&self, index: NodeIndex) -> &NodeStateMachine {
        &self.nodes[index as usize]
    }

    /// A node's ledger store.
    pub fn storage(&self, index: NodeIndex) -> &SimStorage {
        &self.node_storage[index as usize]
    }

    /// A node's signing key (for forging test traffic).
    pub fn key(&self, index: NodeIndex) -> &KeyPair {
        &self.keys[index as usize]
    }

    /// A node's validator address.
    pub fn validator_id(&self, index: NodeIndex) -> ValidatorId {
        self.keys[index as usize].validator_id()
    }

    /// Confirmed height of a node.
    pub fn committed_height(&self, index: NodeIndex) -> u64 {
        self.nodes[index as usize].last_confirmed().0
    }

    /// The network, mutable for partition/loss scenarios.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Driving
    // ═══════════════════════════════════════════════════════════════════════

    /// Boot every node: initial round and health timers.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() {
            let actions = self.nodes[index].start();
            self.execute_actions(index as NodeIndex, actions);
        }
    }

    /// Submit a transaction to one node at the current time.
    pub fn submit_transaction(&mut self, index: NodeIndex, tx: Transaction) {
        self.schedule(index, self.now, Event::SubmitTransaction { tx });
    }

    /// Schedule an arbitrary event (test scenarios).
    pub fn schedule(&mut self, index: NodeIndex, time: Duration, event: Event) {
        let key = EventKey {
            time,
            priority: event.priority(),
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.event_queue.insert(key, (index, event));
    }

    /// Run until the queue drains or simulated time passes `deadline`.
    pub fn run_until(&mut self, deadline: Duration) {
        while let Some((&key, _)) = self.event_queue.iter().next() {
            if key.time > deadline {
                break;
            }
            let (index, event) = self.event_queue.remove(&key).expect("peeked key exists");
            self.now = self.now.max(key.time);

            trace!(node = index, event = event.type_name(), now = ?self.now, "Processing event");

            let node = &mut self.nodes[index as usize];
            node.set_time(self.now);
            let actions = node.handle(event);

            self.stats.events_processed += 1;
            self.stats.actions_generated += actions.len() as u64;
            self.execute_actions(index, actions);
        }
        self.now = self.now.max(deadline);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Action Execution
    // ═══════════════════════════════════════════════════════════════════════

    fn execute_actions(&mut self, from: NodeIndex, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SetTimer { id, duration } => {
                    self.stats.timers_set += 1;
                    // Replace any outstanding timer with the same id.
                    if let Some(old) = self.timers.remove(&(from, id)) {
                        self.event_queue.remove(&old);
                    }
                    let event = match id {
                        TimerId::Round => Event::RoundTimer,
                        TimerId::Health => Event::HealthTimer,
                    };
                    let key = EventKey {
                        time: self.now + duration,
                        priority: event.priority(),
                        sequence: self.sequence,
                    };
                    self.sequence += 1;
                    self.event_queue.insert(key, (from, event));
                    self.timers.insert((from, id), key);
                }

                Action::CancelTimer { id } => {
                    if let Some(key) = self.timers.remove(&(from, id)) {
                        self.event_queue.remove(&key);
                    }
                }

                Action::EnqueueInternal { event } => {
                    self.schedule(from, self.now, *event);
                }

                Action::Multicast { message } => {
                    for to in self.network.all_nodes() {
                        if to == from {
                            continue;
                        }
                        match self.network.should_deliver(from, to, &mut self.rng) {
                            Some(latency) => {
                                self.stats.messages_sent += 1;
                                self.schedule(
                                    to,
                                    self.now + latency,
                                    Event::MessageReceived {
                                        message: message.clone(),
                                    },
                                );
                            }
                            None => self.stats.messages_dropped += 1,
                        }
                    }
                }

                Action::BroadcastBlock { block } => {
                    for to in self.network.all_nodes() {
                        if to == from {
                            continue;
                        }
                        match self.network.should_deliver(from, to, &mut self.rng) {
                            Some(latency) => {
                                self.stats.messages_sent += 1;
                                self.schedule(
                                    to,
                                    self.now + latency,
                                    Event::CertifiedBlockReceived {
                                        block: (*block).clone(),
                                    },
                                );
                            }
                            None => self.stats.messages_dropped += 1,
                        }
                    }
                }

                Action::PingPeer { peer, nonce } => {
                    let to = self.index_of[&peer];
                    let out = self.network.should_deliver(from, to, &mut self.rng);
                    let back = self.network.should_deliver(to, from, &mut self.rng);
                    match (out, back) {
                        (Some(l1), Some(l2)) => {
                            self.schedule(
                                from,
                                self.now + l1 + l2,
                                Event::PongReceived { peer, nonce },
                            );
                        }
                        _ => {
                            let timeout = self.network.config().ping_timeout;
                            self.schedule(from, self.now + timeout, Event::PingFailed { peer });
                        }
                    }
                }

                Action::ExchangeStatus { peer, status } => {
                    let to = self.index_of[&peer];
                    let Some(l1) = self.network.should_deliver(from, to, &mut self.rng) else {
                        self.stats.messages_dropped += 1;
                        continue;
                    };
                    // The peer learns our digest...
                    let from_validator = self.keys[from as usize].validator_id();
                    self.stats.messages_sent += 1;
                    self.schedule(
                        to,
                        self.now + l1,
                        Event::StatusReceived {
                            peer: from_validator,
                            status: *status,
                        },
                    );
                    // ...and answers with its own.
                    if let Some(l2) = self.network.should_deliver(to, from, &mut self.rng) {
                        let reply = self.nodes[to as usize].pbft().status_digest();
                        self.stats.messages_sent += 1;
                        self.schedule(
                            from,
                            self.now + l1 + l2,
                            Event::StatusReceived {
                                peer,
                                status: reply,
                            },
                        );
                    } else {
                        self.stats.messages_dropped += 1;
                    }
                }

                Action::FetchBlockRange { peer, from: start, count } => {
                    let to = self.index_of[&peer];
                    let out = self.network.should_deliver(from, to, &mut self.rng);
                    let back = self.network.should_deliver(to, from, &mut self.rng);
                    match (out, back) {
                        (Some(l1), Some(l2)) => {
                            let blocks = self.node_storage[to as usize].block_range(start, count);
                            self.schedule(
                                from,
                                self.now + l1 + l2,
                                Event::BlockRangeReceived {
                                    peer,
                                    from: start,
                                    blocks,
                                },
                            );
                        }
                        _ => {
                            let timeout = self.network.config().ping_timeout;
                            self.schedule(
                                from,
                                self.now + timeout,
                                Event::BlockRangeFailed { peer },
                            );
                        }
                    }
                }

                Action::AppendBlock { block } => {
                    if let Err(error) = self.node_storage[from as usize].append(*block) {
                        // Duplicate appends can happen when a broadcast
                        // block and local confirmation race.
                        warn!(node = from, %error, "Append rejected");
                    }
                }
            }
        }
    }
}
