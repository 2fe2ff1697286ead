//! WebSocket connection management.
//!
//! [`ConnectionManager`] keeps one socket alive with exponential-backoff
//! reconnects, heartbeats and an outbound queue, and publishes connection
//! events and typed server frames on an [`EventBus`](crate::bus::EventBus).

mod events;
mod heartbeat;
mod manager;
mod reconnect;
mod state;
mod transport;

pub use events::{ConnectionStatus, EventKind};
pub use heartbeat::{Beat, HeartbeatConfig, HeartbeatHandle, start_heartbeat_task};
pub use manager::{ConnectionManager, ManagerOptions};
pub use reconnect::ReconnectPolicy;
pub use state::ConnectionState;
pub use transport::{
    CLOSE_ABNORMAL, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NO_STATUS, CLOSE_NORMAL, SocketCommand,
    SocketError, SocketEvent, SocketFactory, SocketLink, SocketPeer, TungsteniteFactory,
};
