//! Shared types, codec and error definitions used across the workspace.
//!
//! ## Submodules
//!
//! - [`codec`] - Fixed-width wire encoding for the dispatch protocol.
//! - [`difficulty`] - Proof-of-work threshold derived from the label count.
//! - [`error`] - Unified error type and gRPC status conversions.
//! - [`types`] - Commitment, work range, compute result and label geometry.

pub mod codec;
pub mod difficulty;
pub mod error;
pub mod types;

pub use error::{Error, Result};
