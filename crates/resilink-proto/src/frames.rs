//! WebSocket frame definitions.
//!
//! Every frame on the wire is a JSON object with a `type` field. Inbound
//! frames the client understands decode into [`ServerFrame`]; anything else
//! is kept verbatim in [`InboundFrame::Unknown`] so newer servers keep
//! working.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtoError;

/// Event and frame type names.
pub mod kinds {
    /// Token usage changed.
    pub const USAGE_UPDATE: &str = "usage_update";
    /// Backend status changed.
    pub const SYSTEM_STATUS: &str = "system_status";
    /// Content library changed.
    pub const CONTENT_LIBRARY_UPDATE: &str = "content_library_update";
    /// User-facing notification.
    pub const NOTIFICATION: &str = "notification";
    /// Server acknowledged a heartbeat.
    pub const HEARTBEAT_RESPONSE: &str = "heartbeat_response";
    /// Server-side error report.
    pub const ERROR: &str = "error";
    /// Any frame type without a dedicated variant.
    pub const MESSAGE: &str = "message";
    /// Client identifies itself.
    pub const AUTHENTICATE: &str = "authenticate";
    /// Client keepalive.
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Server frames with a dedicated event.
///
/// A missing payload field decodes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Token usage changed.
    UsageUpdate {
        /// Usage snapshot.
        #[serde(default)]
        usage: Value,
    },
    /// Backend status changed.
    SystemStatus {
        /// Status snapshot.
        #[serde(default)]
        status: Value,
    },
    /// Content library changed.
    ContentLibraryUpdate {
        /// Library change.
        #[serde(default)]
        update: Value,
    },
    /// User-facing notification.
    Notification {
        /// Notification body.
        #[serde(default)]
        notification: Value,
    },
    /// Heartbeat acknowledgement.
    HeartbeatResponse {
        /// Every field besides `type`.
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    /// Server-side error report.
    Error {
        /// Error body.
        #[serde(default)]
        error: Value,
    },
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    /// A frame type the client dispatches by name.
    Known(ServerFrame),
    /// Any other JSON value, kept whole.
    Unknown(Value),
}

impl InboundFrame {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error only if the text is not JSON. Valid JSON with an
    /// unrecognised or missing `type` becomes [`InboundFrame::Unknown`].
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }

    /// Classify an already-decoded frame.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match ServerFrame::deserialize(&value) {
            Ok(frame) => Self::Known(frame),
            Err(_) => Self::Unknown(value),
        }
    }

    /// Whether this frame acknowledges a heartbeat.
    #[must_use]
    pub const fn is_heartbeat_response(&self) -> bool {
        matches!(self, Self::Known(ServerFrame::HeartbeatResponse { .. }))
    }

    /// Name of the event subscribers receive this frame on.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Known(ServerFrame::UsageUpdate { .. }) => kinds::USAGE_UPDATE,
            Self::Known(ServerFrame::SystemStatus { .. }) => kinds::SYSTEM_STATUS,
            Self::Known(ServerFrame::ContentLibraryUpdate { .. }) => kinds::CONTENT_LIBRARY_UPDATE,
            Self::Known(ServerFrame::Notification { .. }) => kinds::NOTIFICATION,
            Self::Known(ServerFrame::HeartbeatResponse { .. }) => kinds::HEARTBEAT_RESPONSE,
            Self::Known(ServerFrame::Error { .. }) => kinds::ERROR,
            Self::Unknown(_) => kinds::MESSAGE,
        }
    }

    /// Consume the frame, returning the payload delivered to subscribers.
    ///
    /// Heartbeat responses and unknown frames are delivered whole.
    #[must_use]
    pub fn into_payload(self) -> Value {
        match self {
            Self::Known(ServerFrame::UsageUpdate { usage }) => usage,
            Self::Known(ServerFrame::SystemStatus { status }) => status,
            Self::Known(ServerFrame::ContentLibraryUpdate { update }) => update,
            Self::Known(ServerFrame::Notification { notification }) => notification,
            Self::Known(ServerFrame::HeartbeatResponse { mut fields }) => {
                fields.insert(
                    "type".to_string(),
                    Value::String(kinds::HEARTBEAT_RESPONSE.to_string()),
                );
                Value::Object(fields)
            }
            Self::Known(ServerFrame::Error { error }) => error,
            Self::Unknown(frame) => frame,
        }
    }
}

/// Protocol frames the client sends on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Identify the current user on this connection.
    Authenticate {
        /// User identity.
        #[serde(rename = "userId")]
        user_id: String,
        /// Timestamp.
        timestamp: DateTime<Utc>,
    },
    /// Keepalive.
    Heartbeat {
        /// Timestamp.
        timestamp: DateTime<Utc>,
    },
}

/// Application-defined frame: a `type` plus arbitrary top-level fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFrame {
    /// Value of the `type` field.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining top-level fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Frames sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    /// Authenticate or heartbeat.
    Protocol(ClientFrame),
    /// Anything the application sends.
    Custom(CustomFrame),
}

impl OutboundFrame {
    /// Create an authenticate frame.
    #[must_use]
    pub fn authenticate(user_id: impl Into<String>) -> Self {
        Self::Protocol(ClientFrame::Authenticate {
            user_id: user_id.into(),
            timestamp: Utc::now(),
        })
    }

    /// Create a heartbeat frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::Protocol(ClientFrame::Heartbeat {
            timestamp: Utc::now(),
        })
    }

    /// Create an application frame.
    ///
    /// Object payloads become top-level fields next to `type`; `null`
    /// adds nothing; any other value is placed under `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` is empty.
    pub fn custom(kind: impl Into<String>, payload: Value) -> Result<Self, ProtoError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(ProtoError::InvalidFrame(
                "custom frame type must not be empty".to_string(),
            ));
        }

        let mut fields = match payload {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                let mut fields = Map::new();
                fields.insert("payload".to_string(), other);
                fields
            }
        };
        // `kind` owns the type field.
        fields.remove("type");

        Ok(Self::Custom(CustomFrame { kind, fields }))
    }

    /// Value of the frame's `type` field.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Protocol(ClientFrame::Authenticate { .. }) => kinds::AUTHENTICATE,
            Self::Protocol(ClientFrame::Heartbeat { .. }) => kinds::HEARTBEAT,
            Self::Custom(frame) => &frame.kind,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// A frame whose `type` names a protocol frame but lacks its fields is
    /// kept as [`OutboundFrame::Custom`].
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with a string
    /// `type`.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}
