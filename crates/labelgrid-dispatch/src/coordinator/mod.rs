//! The dispatch server side of the work-dispatch protocol.
//!
//! - [`config`] - CLI arguments and validated dispatch configuration.
//! - [`allocator`] - hands out and re-queues work ranges.
//! - [`session`] - one worker connection.
//! - [`assembler`] - writes results to the sink in index order.
//! - [`sink`] - local and remote label files.
//! - [`server`] - the accept loop and job driver.

pub mod allocator;
pub mod assembler;
pub mod config;
pub mod server;
pub mod session;
pub mod sink;

pub use assembler::DispatchSummary;
pub use server::{DispatchJob, DispatchStats, run_dispatch, run_dispatch_with_stats};
pub use sink::{LabelSink, resume_point};
