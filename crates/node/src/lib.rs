//! Node composition layer.
//!
//! [`NodeStateMachine`] wires the PBFT round driver, the peer health
//! monitor, the block syncer, and the transaction pool into one
//! deterministic state machine that runners (simulation or production)
//! can drive. [`FifoPool`] is the reference transaction-pool
//! collaborator.

mod pool;
mod state;

pub use pool::FifoPool;
pub use state::{NodeSnapshot, NodeStateMachine};
