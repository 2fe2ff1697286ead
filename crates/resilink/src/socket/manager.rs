//! WebSocket connection manager.
//!
//! Owns at most one live socket, reconnects with exponential backoff after
//! abnormal closes, sends heartbeats while connected, queues outbound
//! frames while disconnected and dispatches inbound frames to the event
//! bus by type.
//!
//! All mutable state lives behind one mutex that is never held across an
//! `.await` or while handlers run. Every `connect()` and `disconnect()`
//! bumps a generation counter; socket events and timers from an older
//! generation are ignored.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use resilink_proto::{InboundFrame, OutboundFrame};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bus::{EventBus, Handler};

use super::events::{self, ConnectionStatus, EventKind};
use super::heartbeat::{Beat, HeartbeatConfig, HeartbeatHandle, start_heartbeat_task};
use super::reconnect::ReconnectPolicy;
use super::state::ConnectionState;
use super::transport::{
    CLOSE_ABNORMAL, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL, SocketCommand, SocketEvent,
    SocketFactory, SocketLink,
};

/// Connection manager settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerOptions {
    /// Reconnect policy.
    pub reconnect: ReconnectPolicy,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Identity sent on connect.
    pub user_id: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    generation: u64,
    attempt: u32,
    queue: VecDeque<OutboundFrame>,
    link: Option<mpsc::UnboundedSender<SocketCommand>>,
    user_id: Option<String>,
    connect_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    heartbeat: Option<HeartbeatHandle>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn stop_background(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }
}

type Pending = Vec<(EventKind, Value)>;

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatConfig,
    factory: Arc<dyn SocketFactory>,
    bus: EventBus,
    shared: Mutex<Shared>,
}

/// WebSocket connection manager.
///
/// Cloning yields another handle to the same connection. Background tasks
/// keep running until [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>, factory: Arc<dyn SocketFactory>) -> Self {
        Self::with_options(url, factory, ManagerOptions::default())
    }

    /// Create a manager.
    #[must_use]
    pub fn with_options(
        url: impl Into<String>,
        factory: Arc<dyn SocketFactory>,
        options: ManagerOptions,
    ) -> Self {
        let shared = Shared {
            user_id: options.user_id,
            ..Shared::default()
        };
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                policy: options.reconnect,
                heartbeat: options.heartbeat,
                factory,
                bus: EventBus::new(),
                shared: Mutex::new(shared),
            }),
        }
    }

    /// Open the socket. A no-op while connecting or connected.
    pub fn connect(&self) {
        self.inner.begin_connect(true, None);
    }

    /// Close the socket with code 1000 and cancel reconnects, heartbeats
    /// and queued frames.
    pub fn disconnect(&self) {
        let mut pending = Pending::new();
        {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            shared.stop_background();
            shared.queue.clear();
            if let Some(link) = shared.link.take() {
                let reason = "Client disconnect";
                let _ = link.send(SocketCommand::Close {
                    code: CLOSE_NORMAL,
                    reason: reason.to_string(),
                });
                pending.push((EventKind::Disconnected, events::disconnected(CLOSE_NORMAL, reason)));
            }
            shared.state = ConnectionState::Disconnected;
            shared.attempt = 0;
        }
        info!(url = %self.inner.url, "disconnected by client");
        self.inner.emit_all(pending);
    }

    /// [`disconnect`](Self::disconnect), then wait until the socket has
    /// released its command channel. Frames sent earlier and the close frame
    /// have been handed to the transport by then.
    pub async fn shutdown(&self) {
        let link = self.inner.shared.lock().link.clone();
        self.disconnect();
        if let Some(link) = link {
            link.closed().await;
        }
    }

    /// Send `frame` now if connected, otherwise queue it.
    ///
    /// Returns `true` only if the frame was handed to an open socket.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        let mut shared = self.inner.shared.lock();

        if shared.state == ConnectionState::Connected {
            if let Some(link) = &shared.link {
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(kind = frame.kind(), error = %e, "failed to encode frame");
                        return false;
                    }
                };
                if link.send(SocketCommand::Text(text)).is_ok() {
                    return true;
                }
                warn!(kind = frame.kind(), "socket link closed, frame dropped");
                return false;
            }
        }

        shared.queue.push_back(frame);
        debug!(queued = shared.queue.len(), state = %shared.state, "frame queued until connected");
        false
    }

    /// Set the user identity and announce it if connected.
    pub fn update_auth(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        let mut shared = self.inner.shared.lock();
        if shared.state == ConnectionState::Connected {
            if let Some(link) = &shared.link {
                send_frame(link, &OutboundFrame::authenticate(user_id.clone()));
            }
        }
        shared.user_id = Some(user_id);
    }

    /// Forget the user identity without disconnecting.
    pub fn clear_auth(&self) {
        self.inner.shared.lock().user_id = None;
    }

    /// Subscribe to `kind`.
    pub fn on(&self, kind: EventKind, handler: Handler) {
        self.inner.bus.on(kind.as_str(), handler);
    }

    /// Unsubscribe from `kind`.
    pub fn off(&self, kind: EventKind, handler: &Handler) {
        self.inner.bus.off(kind.as_str(), handler);
    }

    /// The bus events are published on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let shared = self.inner.shared.lock();
        ConnectionStatus {
            state: shared.state,
            reconnect_attempts: shared.attempt,
            max_reconnect_attempts: self.inner.policy.max_attempts,
            queued_messages: shared.queue.len(),
            user_id: shared.user_id.clone(),
        }
    }
}

fn send_frame(link: &mpsc::UnboundedSender<SocketCommand>, frame: &OutboundFrame) -> bool {
    match frame.to_json() {
        Ok(text) => link.send(SocketCommand::Text(text)).is_ok(),
        Err(e) => {
            warn!(kind = frame.kind(), error = %e, "failed to encode frame");
            false
        }
    }
}

fn socket_url(base: &str, user_id: Option<&str>) -> String {
    let Some(user_id) = user_id else {
        return base.to_string();
    };
    match Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("userId", user_id);
            url.to_string()
        }
        Err(_) => format!("{base}?userId={user_id}"),
    }
}

impl Inner {
    fn emit_all(&self, pending: Pending) {
        for (kind, payload) in pending {
            self.bus.emit(kind.as_str(), &payload);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.lock().is_current(generation)
    }

    /// Start a connection attempt. `manual` marks a caller-initiated
    /// connect; `expected` carries the generation a reconnect timer was
    /// armed under.
    fn begin_connect(self: &Arc<Self>, manual: bool, expected: Option<u64>) {
        let mut shared = self.shared.lock();

        if let Some(generation) = expected {
            if !shared.is_current(generation) {
                debug!(generation, "stale reconnect timer ignored");
                return;
            }
        }

        if !shared.state.accepts_connect() {
            debug!(state = %shared.state, "connect ignored");
            return;
        }

        if let Some(timer) = shared.reconnect_timer.take() {
            timer.abort();
        }

        if manual
            && matches!(
                shared.state,
                ConnectionState::Disconnected | ConnectionState::Closed
            )
        {
            shared.attempt = 0;
        }

        shared.generation += 1;
        let generation = shared.generation;
        shared.state = ConnectionState::Connecting;

        let url = socket_url(&self.url, shared.user_id.as_deref());
        info!(url = %url, attempt = shared.attempt, "connecting");

        let task = tokio::spawn(Arc::clone(self).run_connection(generation, url));
        if let Some(old) = shared.connect_task.replace(task) {
            old.abort();
        }
    }

    async fn run_connection(self: Arc<Self>, generation: u64, url: String) {
        let SocketLink {
            outgoing,
            mut incoming,
        } = match self.factory.open(&url).await {
            Ok(link) => link,
            Err(e) => {
                if self.is_current(generation) {
                    warn!(url = %url, error = %e, "websocket open failed");
                    self.bus.emit(EventKind::Error.as_str(), &events::error(&e.to_string()));
                }
                self.handle_close(generation, CLOSE_ABNORMAL, &e.to_string());
                return;
            }
        };

        if !self.handle_open(generation, &outgoing) {
            let _ = outgoing.send(SocketCommand::Close {
                code: CLOSE_NORMAL,
                reason: "Superseded".to_string(),
            });
            return;
        }

        while let Some(event) = incoming.recv().await {
            match event {
                SocketEvent::Text(text) => self.handle_text(generation, &text),
                SocketEvent::Error(message) => {
                    if self.is_current(generation) {
                        warn!(error = %message, "websocket error");
                        self.bus.emit(EventKind::Error.as_str(), &events::error(&message));
                    }
                }
                SocketEvent::Closed { code, reason } => {
                    self.handle_close(generation, code, &reason);
                    return;
                }
            }
            if !self.is_current(generation) {
                return;
            }
        }

        // The link vanished without a close report.
        self.handle_close(generation, CLOSE_ABNORMAL, "");
    }

    fn handle_open(
        self: &Arc<Self>,
        generation: u64,
        link: &mpsc::UnboundedSender<SocketCommand>,
    ) -> bool {
        {
            let mut shared = self.shared.lock();
            if !shared.is_current(generation) || shared.state != ConnectionState::Connecting {
                return false;
            }

            shared.state = ConnectionState::Connected;
            shared.attempt = 0;
            shared.link = Some(link.clone());
            shared.heartbeat = Some(self.start_heartbeat(generation));

            let mut flushed = 0usize;
            while let Some(frame) = shared.queue.pop_front() {
                if !send_frame(link, &frame) {
                    shared.queue.push_front(frame);
                    break;
                }
                flushed += 1;
            }

            if let Some(user_id) = shared.user_id.clone() {
                send_frame(link, &OutboundFrame::authenticate(user_id));
            }

            info!(url = %self.url, flushed, "websocket connected");
        }

        self.bus.emit(EventKind::Connected.as_str(), &events::connected());
        true
    }

    fn start_heartbeat(self: &Arc<Self>, generation: u64) -> HeartbeatHandle {
        let weak = Arc::downgrade(self);
        start_heartbeat_task(self.heartbeat, move |beat| {
            weak.upgrade()
                .is_some_and(|inner| inner.on_beat(generation, beat))
        })
    }

    fn on_beat(self: &Arc<Self>, generation: u64, beat: Beat) -> bool {
        match beat {
            Beat::Send => {
                let shared = self.shared.lock();
                if !shared.is_current(generation) || shared.state != ConnectionState::Connected {
                    return false;
                }
                shared
                    .link
                    .as_ref()
                    .is_some_and(|link| send_frame(link, &OutboundFrame::heartbeat()))
            }
            Beat::Expired => {
                let reason = "Heartbeat timeout";
                {
                    let shared = self.shared.lock();
                    if !shared.is_current(generation) {
                        return false;
                    }
                    warn!(url = %self.url, "heartbeat unanswered, closing socket");
                    if let Some(link) = &shared.link {
                        let _ = link.send(SocketCommand::Close {
                            code: CLOSE_HEARTBEAT_TIMEOUT,
                            reason: reason.to_string(),
                        });
                    }
                }
                self.handle_close(generation, CLOSE_HEARTBEAT_TIMEOUT, reason);
                false
            }
        }
    }

    fn handle_text(&self, generation: u64, text: &str) {
        let frame = match InboundFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        {
            let shared = self.shared.lock();
            if !shared.is_current(generation) || shared.state != ConnectionState::Connected {
                return;
            }
            if frame.is_heartbeat_response() {
                if let Some(heartbeat) = &shared.heartbeat {
                    heartbeat.ack_received();
                }
            }
        }

        let name = frame.event_name();
        debug!(kind = name, "frame received");
        self.bus.emit(name, &frame.into_payload());
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: &str) {
        let mut pending = Pending::new();
        {
            let mut shared = self.shared.lock();
            if !shared.is_current(generation) || !shared.state.has_socket() {
                return;
            }

            shared.stop_background();
            shared.link = None;
            pending.push((EventKind::Disconnected, events::disconnected(code, reason)));

            if code == CLOSE_NORMAL {
                shared.state = ConnectionState::Disconnected;
                info!(url = %self.url, "websocket closed normally");
            } else if !self.policy.should_reconnect(shared.attempt) {
                shared.state = ConnectionState::Closed;
                error!(
                    url = %self.url,
                    attempts = shared.attempt,
                    "max reconnect attempts reached"
                );
                pending.push((
                    EventKind::MaxReconnectsReached,
                    events::max_reconnects_reached(shared.attempt),
                ));
            } else {
                shared.attempt += 1;
                let attempt = shared.attempt;
                let delay = self.policy.delay_for_attempt(attempt);
                shared.state = ConnectionState::Reconnecting;
                warn!(
                    url = %self.url,
                    code,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "websocket lost, reconnecting"
                );
                pending.push((EventKind::Reconnecting, events::reconnecting(attempt, delay)));

                let weak = Arc::downgrade(self);
                shared.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.begin_connect(false, Some(generation));
                    }
                }));
            }
        }
        self.emit_all(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_without_identity() {
        assert_eq!(socket_url("ws://host/ws", None), "ws://host/ws");
    }

    #[test]
    fn test_socket_url_encodes_identity() {
        assert_eq!(
            socket_url("ws://host/ws", Some("a b&c")),
            "ws://host/ws?userId=a+b%26c"
        );
    }

    #[test]
    fn test_socket_url_keeps_existing_query() {
        assert_eq!(
            socket_url("ws://host/ws?v=2", Some("u1")),
            "ws://host/ws?v=2&userId=u1"
        );
    }
}
