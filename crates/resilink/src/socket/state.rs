//! Connection state types.

use std::fmt;

use serde::Serialize;

/// State of the WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// Opening a socket.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting for the reconnect timer.
    Reconnecting,
    /// Reconnect attempts exhausted. Only `connect()` leaves this state.
    Closed,
}

impl ConnectionState {
    /// Whether a socket may currently exist.
    #[must_use]
    pub const fn has_socket(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Whether `connect()` should start a new attempt from this state.
    #[must_use]
    pub const fn accepts_connect(self) -> bool {
        !self.has_socket()
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
