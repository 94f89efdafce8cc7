//! Error types shared by the dispatch and storage protocols.
//!
//! This module defines the central [`Error`] enum. It covers transport
//! failures on the dispatch wire, protocol violations, filesystem failures in
//! the storage service and the remote errors surfaced by the storage client.
//! It implements `From<Error>` for `tonic::Status` (server side) and
//! `From<tonic::Status>` for `Error` (client side) so that storage errors keep
//! their meaning across the RPC boundary.
//!
//! ## Error Cases
//! - `Connect`, `IncompleteRead`, `WriteFailure`: transport failures. A worker
//!   recovers from them by reconnecting; a session never survives them.
//! - `ProtocolViolation`: a field failed validation on the dispatch wire.
//! - `InvalidArgument`: a storage request was malformed (e.g. a truncation
//!   size that is not byte aligned).
//! - `Io`: a filesystem operation failed in the storage service.
//! - `NoActiveSession`: a storage operation arrived before `Open`.
//! - `Engine`: the compute engine failed to initialise or compute.
//! - `ChannelError`: an internal task channel closed unexpectedly.
//! - `Remote`: the storage service returned an error without a local variant.
//! - `ServiceShutdown`: a request arrived while the service was stopping.
//!
//! The type is `Clone` because the storage client hands the same sticky error
//! to every caller after the first failed write.

use std::io;
use std::sync::Arc;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch and storage protocols.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Could not establish a transport connection.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// A read could not fill the exact number of bytes expected.
    #[error("Incomplete read of {expected} bytes: {source}")]
    IncompleteRead {
        expected: usize,
        #[source]
        source: Arc<io::Error>,
    },

    /// A write or flush could not complete.
    #[error("Write failure: {source}")]
    WriteFailure {
        #[source]
        source: Arc<io::Error>,
    },

    /// A field on the dispatch wire failed validation.
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// A storage request was malformed.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A filesystem operation failed.
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// A storage operation was issued without a prior successful `Open`.
    #[error("No active storage session")]
    NoActiveSession,

    /// The compute engine failed.
    #[error("Compute engine error: {reason}")]
    Engine { reason: String },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The storage service answered with an error that has no local variant.
    #[error("Remote error ({code:?}): {message}")]
    Remote { code: Code, message: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Wraps an I/O error with a short description of the failed operation.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns `true` for transport-level failures (connect, read, write).
    pub const fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::IncompleteRead { .. } | Self::WriteFailure { .. }
        )
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument { reason } => Status::invalid_argument(reason),
            Error::ProtocolViolation { reason } => Status::invalid_argument(reason),
            Error::NoActiveSession => Status::failed_precondition("No active storage session"),
            Error::Io { context, source } => {
                Status::internal(format!("I/O error ({context}): {source}"))
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::Remote { code, message } => Status::new(code, message),
            other => Status::internal(other.to_string()),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::InvalidArgument => Self::InvalidArgument {
                reason: status.message().to_string(),
            },
            Code::FailedPrecondition => Self::NoActiveSession,
            Code::Unavailable => Self::ServiceShutdown,
            code => Self::Remote {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Remote {
            code: Code::Unavailable,
            message: format!("Transport error: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_survive_the_rpc_boundary() {
        let status: Status = Error::invalid_argument("not byte aligned").into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(matches!(
            Error::from(status),
            Error::InvalidArgument { reason } if reason == "not byte aligned"
        ));

        let status: Status = Error::NoActiveSession.into();
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert!(matches!(Error::from(status), Error::NoActiveSession));

        let status: Status = Error::io("open", io::Error::other("disk full")).into();
        assert_eq!(status.code(), Code::Internal);
        assert!(matches!(
            Error::from(status),
            Error::Remote { code: Code::Internal, .. }
        ));
    }

    #[test]
    fn transport_failures_are_classified_as_connection_errors() {
        let eof = Error::IncompleteRead {
            expected: 8,
            source: Arc::new(io::ErrorKind::UnexpectedEof.into()),
        };
        assert!(eof.is_connection());
        assert!(!Error::protocol("bad token").is_connection());
        assert!(!Error::NoActiveSession.is_connection());
    }
}
