//! WebSocket transport seam.
//!
//! A [`SocketFactory`] opens a [`SocketLink`]: a pair of channels standing
//! in for one live socket. The connection manager only ever talks to the
//! link, so tests drive it with in-memory peers.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Close code for a client-initiated clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the peer closed without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the link dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code used when heartbeats go unanswered.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// WebSocket fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The socket could not be opened.
    #[error("websocket connect failed: {0}")]
    Connect(String),

    /// The link is gone.
    #[error("websocket link closed")]
    LinkClosed,
}

/// Instruction for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Send a text frame.
    Text(String),
    /// Close the socket.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Text frame received.
    Text(String),
    /// Transport fault; a `Closed` event follows.
    Error(String),
    /// The socket closed. Always the last event on a link.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Client side of one open socket.
#[derive(Debug)]
pub struct SocketLink {
    /// Commands to the socket.
    pub outgoing: mpsc::UnboundedSender<SocketCommand>,
    /// Events from the socket.
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Socket side of a [`SocketLink`].
#[derive(Debug)]
pub struct SocketPeer {
    /// Commands sent by the client.
    pub commands: mpsc::UnboundedReceiver<SocketCommand>,
    /// Events delivered to the client.
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

impl SocketPeer {
    /// Deliver a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::LinkClosed`] if the client side is gone.
    pub fn push_text(&self, text: impl Into<String>) -> Result<(), SocketError> {
        self.events
            .send(SocketEvent::Text(text.into()))
            .map_err(|_| SocketError::LinkClosed)
    }

    /// Report that the socket closed.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::LinkClosed`] if the client side is gone.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), SocketError> {
        self.events
            .send(SocketEvent::Closed {
                code,
                reason: reason.into(),
            })
            .map_err(|_| SocketError::LinkClosed)
    }
}

impl SocketLink {
    /// Create a connected link/peer pair.
    #[must_use]
    pub fn channel() -> (Self, SocketPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: command_tx,
                incoming: event_rx,
            },
            SocketPeer {
                commands: command_rx,
                events: event_tx,
            },
        )
    }
}

/// Opens sockets.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Open a socket to `url`.
    async fn open(&self, url: &str) -> Result<SocketLink, SocketError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`SocketFactory`] backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct TungsteniteFactory {
    connect_timeout: Duration,
}

impl Default for TungsteniteFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TungsteniteFactory {
    /// Create a factory whose handshakes give up after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn reader_task(mut read: SplitStream<WsStream>, events: mpsc::UnboundedSender<SocketEvent>) {
        let closed = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if events.send(SocketEvent::Text(text.as_str().to_owned())).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                        (u16::from(f.code), f.reason.as_str().to_owned())
                    });
                    break SocketEvent::Closed { code, reason };
                }
                Some(Ok(other)) => {
                    trace!(kind = ?other, "ignoring non-text frame");
                }
                Some(Err(e)) => {
                    let _ = events.send(SocketEvent::Error(e.to_string()));
                    break SocketEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    };
                }
                None => {
                    break SocketEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    };
                }
            }
        };
        let _ = events.send(closed);
    }

    async fn writer_task(
        mut write: SplitSink<WsStream, Message>,
        mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    ) {
        while let Some(command) = commands.recv().await {
            match command {
                SocketCommand::Text(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        debug!(error = %e, "websocket write failed");
                        return;
                    }
                }
                SocketCommand::Close { code, reason } => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "websocket close failed");
                    }
                    return;
                }
            }
        }
        // Client dropped the link.
        let _ = write.close().await;
    }
}

#[async_trait]
impl SocketFactory for TungsteniteFactory {
    async fn open(&self, url: &str) -> Result<SocketLink, SocketError> {
        let (ws_stream, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(url),
        )
        .await
        .map_err(|_| SocketError::Connect(format!("handshake with {url} timed out")))?
        .map_err(|e| SocketError::Connect(e.to_string()))?;

        let (write, read) = ws_stream.split();
        let (link, peer) = SocketLink::channel();
        let SocketPeer { commands, events } = peer;

        tokio::spawn(Self::reader_task(read, events));
        tokio::spawn(Self::writer_task(write, commands));

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_pair_carries_both_ways() {
        let (mut link, mut peer) = SocketLink::channel();

        link.outgoing
            .send(SocketCommand::Text("hi".to_string()))
            .unwrap();
        peer.push_text("hello").unwrap();
        peer.close(CLOSE_NORMAL, "bye").unwrap();

        assert_eq!(
            peer.commands.recv().await,
            Some(SocketCommand::Text("hi".to_string()))
        );
        assert_eq!(
            link.incoming.recv().await,
            Some(SocketEvent::Text("hello".to_string()))
        );
        assert_eq!(
            link.incoming.recv().await,
            Some(SocketEvent::Closed {
                code: CLOSE_NORMAL,
                reason: "bye".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_peer_reports_dropped_link() {
        let (link, peer) = SocketLink::channel();
        drop(link);
        assert_eq!(peer.push_text("x"), Err(SocketError::LinkClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let factory = TungsteniteFactory::new(Duration::from_secs(2));
        let err = factory.open("ws://127.0.0.1:1/ws").await.unwrap_err();
        assert!(matches!(err, SocketError::Connect(_)));
    }
}
