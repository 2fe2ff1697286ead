//! Error types for the resilink-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire types.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a frame or envelope.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a frame or body.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// A frame was structurally valid JSON but not usable.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}
