//! # resilink-proto
//!
//! Wire types shared by the resilink HTTP pipeline and WebSocket
//! connection manager.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod frames;

pub use envelope::{Envelope, ErrorCategory};
pub use error::ProtoError;
pub use frames::{ClientFrame, CustomFrame, InboundFrame, OutboundFrame, ServerFrame, kinds};
