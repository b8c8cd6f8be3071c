//! Crate & wire-level errors.
//!
//! This module provides the error types for the Bureaucrat admin client core.
//!
//! # Error Hierarchy
//!
//! The crate uses a two-layer error hierarchy:
//!
//! ## Client Layer
//!
//! - [`Error`]: everything the dispatch core can report to a caller's
//!   future, plus connection and configuration errors.
//!
//! ## Wire Layer
//!
//! - [`ErrorCode`]: numeric error codes carried in broker responses. The
//!   response-parsing layer (out of scope for this crate) maps codes onto
//!   [`Error::Api`], which carries per-code retriability.
//!
//! # Retriability
//!
//! [`Error::is_retriable`] is the single classification the worker's failure
//! ladder consults: transient API codes and mid-flight disconnections are
//! retried until the call's deadline or retry budget runs out; everything
//! else is terminal.

use num_derive::FromPrimitive;
use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the admin dispatch core.
///
/// Every failed call completes its future with exactly one of these. The
/// worker routes all failures through a single handler, so the retriable
/// variants may be seen several times internally before a terminal variant
/// reaches the caller.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// An error code returned by a broker in a response body.
    #[error("API error: {0:?}")]
    Api(ErrorCode),

    /// An error in the network.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),

    /// The connection dropped while a request was in flight.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// The destination does not speak the protocol version we used.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Authentication with the destination failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The call's deadline passed before it could complete.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The client is shutting down and no longer accepts calls.
    #[error("Shutting down: {0}")]
    Shutdown(String),

    /// Internal error: malformed response, unknown correlation id,
    /// request build failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure ladder may retry an attempt that failed with
    /// this error. Deadlines and retry budgets still apply.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Api(code) => code.is_retriable(),
            Error::Disconnected(_) => true,
            Error::Io(_)
            | Error::UnsupportedVersion(_)
            | Error::Authentication(_)
            | Error::Timeout(_)
            | Error::Shutdown(_)
            | Error::Internal(_)
            | Error::Config(_) => false,
        }
    }

    /// Whether this error should be offered to a call's protocol-downgrade
    /// hook before the regular retry accounting.
    pub(crate) fn is_unsupported_version(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedVersion(_) | Error::Api(ErrorCode::UnsupportedVersion)
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

/// Error codes reported by a remote broker.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum ErrorCode {
    /// An unexpected server error.
    Unknown = -1,
    #[default]
    None = 0,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// There is currently no leader for this partition and hence it is
    /// unavailable for writes.
    LeaderNotAvailable = 5,
    /// The client's metadata is out of date: the addressed replica is not
    /// the leader for the partition.
    NotLeaderForPartition = 6,
    /// The request exceeded the user-specified time limit.
    RequestTimedOut = 7,
    /// Used mostly by tools when a broker is not alive.
    BrokerNotAvailable = 8,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The coordinator is still loading group state after a leadership
    /// change for its backing partition.
    CoordinatorLoadInProgress = 14,
    /// The coordinator's backing topic has not yet been created, or the
    /// coordinator is not active.
    CoordinatorNotAvailable = 15,
    /// The addressed broker is not the coordinator for the given group.
    NotCoordinator = 16,
    /// The request names an invalid topic, or attempts to write to an
    /// internal topic.
    InvalidTopic = 17,
    /// The client is not authorized to access the requested topic.
    TopicAuthorizationFailed = 29,
    /// The client is not authorized to access a particular group.
    GroupAuthorizationFailed = 30,
    /// The client is not authorized to use an inter-broker or
    /// administrative API.
    ClusterAuthorizationFailed = 31,
    /// The version of the API is not supported by the destination.
    UnsupportedVersion = 35,
    /// Topic with this name already exists.
    TopicAlreadyExists = 36,
    /// Number of partitions is invalid.
    InvalidPartitions = 37,
    /// Replication factor is invalid.
    InvalidReplicationFactor = 38,
    /// This is not the correct controller for this cluster.
    NotController = 41,
    /// The request is malformed or violates an invariant the broker
    /// enforces.
    InvalidRequest = 42,
    /// Disk error when trying to access the log file on disk.
    KafkaStorageError = 56,
    /// SASL authentication failed.
    SaslAuthenticationFailed = 58,
    /// The requested operation was throttled by a quota violation.
    ThrottlingQuotaExceeded = 89,
}

impl ErrorCode {
    /// Whether a request that failed with this code may succeed if resent,
    /// possibly to a different destination.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorCode::UnknownTopicOrPartition
                | ErrorCode::LeaderNotAvailable
                | ErrorCode::NotLeaderForPartition
                | ErrorCode::RequestTimedOut
                | ErrorCode::BrokerNotAvailable
                | ErrorCode::NetworkException
                | ErrorCode::CoordinatorLoadInProgress
                | ErrorCode::CoordinatorNotAvailable
                | ErrorCode::NotCoordinator
                | ErrorCode::NotController
                | ErrorCode::KafkaStorageError
                | ErrorCode::ThrottlingQuotaExceeded
        )
    }
}
