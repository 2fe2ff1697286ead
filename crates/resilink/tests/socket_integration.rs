//! End-to-end tests against a real WebSocket server on localhost.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use resilink::socket::{
    ConnectionManager, ConnectionState, EventKind, ManagerOptions, ReconnectPolicy,
    TungsteniteFactory,
};
use resilink::{ClientFrame, OutboundFrame, handler};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Mock Gateway Server
// ============================================================================

#[derive(Debug, PartialEq)]
enum Seen {
    Opened(usize),
    Text(Value),
    Closed(Option<u16>),
}

enum Control {
    Send(String),
    Close(u16),
}

/// Serves one connection at a time, reporting what it sees and doing what
/// it is told.
struct MockGateway {
    addr: SocketAddr,
    seen: mpsc::UnboundedReceiver<Seen>,
    control: mpsc::UnboundedSender<Control>,
}

impl MockGateway {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen) = mpsc::unbounded_channel();
        let (control, mut control_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut connections = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                connections += 1;
                let _ = seen_tx.send(Seen::Opened(connections));

                loop {
                    tokio::select! {
                        msg = ws.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                                let _ = seen_tx.send(Seen::Text(value));
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let _ = seen_tx.send(Seen::Closed(frame.map(|f| u16::from(f.code))));
                                break;
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        command = control_rx.recv() => match command {
                            Some(Control::Send(text)) => {
                                let _ = ws.send(Message::Text(text.into())).await;
                            }
                            Some(Control::Close(code)) => {
                                let frame = CloseFrame {
                                    code: CloseCode::from(code),
                                    reason: "server going away".into(),
                                };
                                let _ = ws.close(Some(frame)).await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            seen,
            control,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn next_seen(&mut self) -> Seen {
        timeout(WAIT, self.seen.recv())
            .await
            .expect("gateway saw nothing")
            .expect("gateway stopped")
    }

    async fn next_text(&mut self) -> Value {
        match self.next_seen().await {
            Seen::Text(value) => value,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn next_frame(&mut self) -> OutboundFrame {
        let text = self.next_text().await.to_string();
        OutboundFrame::from_json(&text).expect("client sent a well-formed frame")
    }

    fn push(&self, frame: Value) {
        let _ = self.control.send(Control::Send(frame.to_string()));
    }

    fn close(&self, code: u16) {
        let _ = self.control.send(Control::Close(code));
    }
}

fn manager_for(gateway: &MockGateway, user_id: Option<&str>) -> ConnectionManager {
    ConnectionManager::with_options(
        gateway.url(),
        Arc::new(TungsteniteFactory::new(WAIT)),
        ManagerOptions {
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(50),
                ..ReconnectPolicy::default()
            },
            user_id: user_id.map(str::to_string),
            ..ManagerOptions::default()
        },
    )
}

fn record(
    manager: &ConnectionManager,
    kinds: &[EventKind],
) -> mpsc::UnboundedReceiver<(EventKind, Value)> {
    let (tx, rx) = mpsc::unbounded_channel();
    for &kind in kinds {
        let tx = tx.clone();
        manager.on(
            kind,
            handler(move |payload| {
                let _ = tx.send((kind, payload.clone()));
            }),
        );
    }
    rx
}

async fn expect_event(
    events: &mut mpsc::UnboundedReceiver<(EventKind, Value)>,
    kind: EventKind,
) -> Value {
    let (got, payload) = timeout(WAIT, events.recv())
        .await
        .expect("no event")
        .expect("bus dropped");
    assert_eq!(got, kind, "unexpected event payload {payload}");
    payload
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_connect_authenticates_and_receives_frames() {
    // Arrange
    let mut gateway = MockGateway::start().await;
    let manager = manager_for(&gateway, Some("user-1"));
    let mut events = record(&manager, &[EventKind::Connected, EventKind::UsageUpdate]);

    // Act
    manager.connect();

    // Assert
    expect_event(&mut events, EventKind::Connected).await;
    assert_eq!(gateway.next_seen().await, Seen::Opened(1));
    match gateway.next_frame().await {
        OutboundFrame::Protocol(ClientFrame::Authenticate { user_id, .. }) => {
            assert_eq!(user_id, "user-1");
        }
        other => panic!("expected authenticate, got {other:?}"),
    }

    gateway.push(json!({"type": "usage_update", "usage": {"tokens": 7}}));
    let usage = expect_event(&mut events, EventKind::UsageUpdate).await;
    assert_eq!(usage, json!({"tokens": 7}));

    manager.disconnect();
}

#[tokio::test]
async fn test_queued_frame_is_delivered_after_open() {
    let mut gateway = MockGateway::start().await;
    let manager = manager_for(&gateway, None);

    let frame = OutboundFrame::custom("chat", json!({"text": "hello"})).unwrap();
    assert!(!manager.send(frame.clone()));
    manager.connect();

    assert_eq!(gateway.next_seen().await, Seen::Opened(1));
    assert_eq!(gateway.next_frame().await, frame);
    assert_eq!(manager.status().queued_messages, 0);

    manager.disconnect();
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let mut gateway = MockGateway::start().await;
    let manager = manager_for(&gateway, None);
    let mut events = record(
        &manager,
        &[
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Reconnecting,
        ],
    );

    manager.connect();
    expect_event(&mut events, EventKind::Connected).await;
    assert_eq!(gateway.next_seen().await, Seen::Opened(1));

    gateway.close(1011);

    let disconnected = expect_event(&mut events, EventKind::Disconnected).await;
    assert_eq!(disconnected["code"], 1011);
    assert_eq!(disconnected["reason"], "server going away");
    let reconnecting = expect_event(&mut events, EventKind::Reconnecting).await;
    assert_eq!(reconnecting, json!({"attempt": 1, "delayMs": 50}));

    expect_event(&mut events, EventKind::Connected).await;
    assert_eq!(gateway.next_seen().await, Seen::Opened(2));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.status().reconnect_attempts, 0);

    manager.disconnect();
}

#[tokio::test]
async fn test_disconnect_sends_normal_close() {
    let mut gateway = MockGateway::start().await;
    let manager = manager_for(&gateway, None);
    let mut events = record(&manager, &[EventKind::Connected]);

    manager.connect();
    expect_event(&mut events, EventKind::Connected).await;
    assert_eq!(gateway.next_seen().await, Seen::Opened(1));

    manager.disconnect();

    assert_eq!(gateway.next_seen().await, Seen::Closed(Some(1000)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_shutdown_flushes_frame_before_close() {
    let mut gateway = MockGateway::start().await;
    let manager = manager_for(&gateway, None);
    let mut events = record(&manager, &[EventKind::Connected]);

    manager.connect();
    expect_event(&mut events, EventKind::Connected).await;
    assert_eq!(gateway.next_seen().await, Seen::Opened(1));

    let frame = OutboundFrame::custom("farewell", json!({"n": 1})).unwrap();
    assert!(manager.send(frame.clone()));
    timeout(WAIT, manager.shutdown())
        .await
        .expect("writer released the link");

    assert_eq!(gateway.next_frame().await, frame);
    assert_eq!(gateway.next_seen().await, Seen::Closed(Some(1000)));
}

#[tokio::test]
async fn test_unreachable_server_schedules_reconnect() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let manager = ConnectionManager::with_options(
        format!("ws://{addr}/ws"),
        Arc::new(TungsteniteFactory::new(WAIT)),
        ManagerOptions {
            reconnect: ReconnectPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(20),
                ..ReconnectPolicy::default()
            },
            ..ManagerOptions::default()
        },
    );
    let mut events = record(
        &manager,
        &[
            EventKind::Error,
            EventKind::Reconnecting,
            EventKind::MaxReconnectsReached,
        ],
    );

    manager.connect();

    expect_event(&mut events, EventKind::Error).await;
    expect_event(&mut events, EventKind::Reconnecting).await;
    expect_event(&mut events, EventKind::Error).await;
    expect_event(&mut events, EventKind::MaxReconnectsReached).await;
    assert_eq!(manager.state(), ConnectionState::Closed);
}
