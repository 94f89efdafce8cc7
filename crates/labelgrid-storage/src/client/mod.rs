//! Producer-side client for the label storage service.
//!
//! - [`writer`] - `RemoteLabelsWriter`, a buffered, ordered writer with a
//!   sticky error.

pub mod writer;

pub use writer::{
    DEFAULT_QUEUE_CAPACITY, MAX_WRITE_CHUNK_BYTES, REMOTE_ADDR_ENV, RemoteLabelsWriter, endpoint_uri,
};
