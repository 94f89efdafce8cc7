#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod signal;
pub mod telemetry;

/// gRPC service and message definitions generated from
/// `proto/labelstore.proto`.
///
/// ## Service
///
/// - `LabelStore` - Open, Write, Flush, NumLabelsWritten, Truncate and Close
///   on a single remote label file.
///
/// Error codes follow [`Error`]'s `tonic::Status` conversion:
/// `INVALID_ARGUMENT` for malformed requests, `FAILED_PRECONDITION` when no
/// session is open, `INTERNAL` for filesystem failures and `UNAVAILABLE` while
/// shutting down.
pub mod proto {
    tonic::include_proto!("labelstore");

    /// Encoded descriptor set for the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("labelstore_descriptor");
}
