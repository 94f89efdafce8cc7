//! The compute node side of the dispatch protocol.
//!
//! - [`config`] - CLI arguments and validated worker configuration.
//! - [`state`] - connection states.
//! - [`node`] - the reconnecting client loop (`ComputeNode`).

pub mod config;
pub mod node;
pub mod state;

pub use node::{ComputeNode, WorkerStats};
pub use state::WorkerState;
