//! Production runtime for a Palisade validator.
//!
//! Everything the deterministic core is not: tokio timers, TCP
//! transport and its wire codec, the RocksDB ledger store, Prometheus
//! metrics, tracing setup, and node configuration. The
//! [`ProductionRunner`] glues them to the [`palisade_node`] state
//! machine.

pub mod codec;
pub mod config;
pub mod metrics;
pub mod storage;
pub mod telemetry;
pub mod timers;
pub mod transport;

mod runner;

pub use config::{ConfigError, NodeConfig};
pub use runner::{ProductionRunner, SharedState};
pub use storage::RocksLedgerStore;
pub use transport::{serve, ServerContext, TcpTransport, Transport, TransportError};
