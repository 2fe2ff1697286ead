//! Connection events and status snapshots.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use resilink_proto::kinds;
use serde::Serialize;
use serde_json::{Value, json};

use super::state::ConnectionState;

/// Events subscribers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Socket opened.
    Connected,
    /// Socket closed, for any reason.
    Disconnected,
    /// A reconnect was scheduled.
    Reconnecting,
    /// Socket fault or server `error` frame.
    Error,
    /// Reconnect attempts exhausted.
    MaxReconnectsReached,
    /// Server `usage_update` frame.
    UsageUpdate,
    /// Server `system_status` frame.
    SystemStatus,
    /// Server `content_library_update` frame.
    ContentLibraryUpdate,
    /// Server `notification` frame.
    Notification,
    /// Server `heartbeat_response` frame.
    HeartbeatResponse,
    /// Any frame without a dedicated kind.
    Message,
}

impl EventKind {
    /// Every kind.
    pub const ALL: [Self; 11] = [
        Self::Connected,
        Self::Disconnected,
        Self::Reconnecting,
        Self::Error,
        Self::MaxReconnectsReached,
        Self::UsageUpdate,
        Self::SystemStatus,
        Self::ContentLibraryUpdate,
        Self::Notification,
        Self::HeartbeatResponse,
        Self::Message,
    ];

    /// Event name on the bus.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Error => kinds::ERROR,
            Self::MaxReconnectsReached => "max_reconnects_reached",
            Self::UsageUpdate => kinds::USAGE_UPDATE,
            Self::SystemStatus => kinds::SYSTEM_STATUS,
            Self::ContentLibraryUpdate => kinds::CONTENT_LIBRARY_UPDATE,
            Self::Notification => kinds::NOTIFICATION,
            Self::HeartbeatResponse => kinds::HEARTBEAT_RESPONSE,
            Self::Message => kinds::MESSAGE,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn connected() -> Value {
    json!({ "timestamp": timestamp() })
}

pub(crate) fn disconnected(code: u16, reason: &str) -> Value {
    json!({ "code": code, "reason": reason, "timestamp": timestamp() })
}

pub(crate) fn reconnecting(attempt: u32, delay: Duration) -> Value {
    json!({ "attempt": attempt, "delayMs": delay.as_millis() as u64 })
}

pub(crate) fn error(message: &str) -> Value {
    json!({ "message": message })
}

pub(crate) fn max_reconnects_reached(attempts: u32) -> Value {
    json!({ "attempts": attempts })
}

/// Snapshot of the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnects made since the last successful open.
    pub reconnect_attempts: u32,
    /// Reconnect limit.
    pub max_reconnect_attempts: u32,
    /// Frames waiting for a connection.
    pub queued_messages: usize,
    /// Identity sent on connect.
    pub user_id: Option<String>,
}

impl ConnectionStatus {
    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
