//! Error types for resilink.
//!
//! Expected network failures never surface here: the request pipeline folds
//! them into an [`Envelope`](resilink_proto::Envelope) and the connection
//! manager turns them into events. These variants cover misuse and setup.

use thiserror::Error;

/// Errors returned by resilink operations.
#[derive(Debug, Error)]
pub enum ResilinkError {
    /// A request descriptor was malformed.
    #[error("invalid request descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An HTTP or WebSocket transport could not be constructed.
    #[error("transport setup failed: {0}")]
    TransportSetup(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] resilink_proto::ProtoError),
}
