//! Normalized HTTP result envelope.
//!
//! Every call through the request pipeline resolves to an [`Envelope`]:
//! either the decoded success payload or a classified failure. Callers
//! branch on [`Envelope::is_success`] instead of handling errors.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ProtoError;

/// Classified failure category carried by a failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No response was received.
    NetworkError,
    /// The request deadline elapsed.
    Timeout,
    /// The server answered with a non-2xx status.
    Http(u16),
    /// The call required credentials and none could be resolved.
    AuthenticationRequired,
}

impl ErrorCategory {
    /// Whether a failure of this category may be retried.
    ///
    /// Network failures, timeouts, 5xx and 429 are retryable. Every other
    /// 4xx is final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError | Self::Timeout => true,
            Self::Http(status) => *status >= 500 || *status == 429,
            Self::AuthenticationRequired => false,
        }
    }

    /// HTTP status for [`ErrorCategory::Http`], `None` otherwise.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http(status) => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkError => write!(f, "network_error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Http(status) => write!(f, "http_{status}"),
            Self::AuthenticationRequired => write!(f, "authentication_required"),
        }
    }
}

impl FromStr for ErrorCategory {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network_error" => Ok(Self::NetworkError),
            "timeout" => Ok(Self::Timeout),
            "authentication_required" => Ok(Self::AuthenticationRequired),
            other => other
                .strip_prefix("http_")
                .and_then(|code| code.parse::<u16>().ok())
                .map(Self::Http)
                .ok_or_else(|| ProtoError::Decoding(format!("unknown error category: {other}"))),
        }
    }
}

impl Serialize for ErrorCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ErrorCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Result of one logical HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// The call succeeded.
    Success {
        /// Decoded response body.
        payload: Value,
        /// Served from the response cache without network I/O.
        from_cache: bool,
    },
    /// The call failed with a classified error.
    Failure {
        /// Failure category.
        error: ErrorCategory,
        /// Human-readable message.
        message: String,
        /// Parsed error body, when the server sent one.
        details: Option<Value>,
    },
}

impl Envelope {
    /// Create a success envelope for a fresh network response.
    #[must_use]
    pub const fn success(payload: Value) -> Self {
        Self::Success {
            payload,
            from_cache: false,
        }
    }

    /// Create a success envelope for a cache hit.
    #[must_use]
    pub const fn cached(payload: Value) -> Self {
        Self::Success {
            payload,
            from_cache: true,
        }
    }

    /// Create a failure envelope.
    #[must_use]
    pub fn failure(error: ErrorCategory, message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Failure {
            error,
            message: message.into(),
            details,
        }
    }

    /// Whether this envelope carries a success payload.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether this envelope was served from cache.
    #[must_use]
    pub const fn is_from_cache(&self) -> bool {
        matches!(self, Self::Success { from_cache: true, .. })
    }

    /// The success payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload, .. } => Some(payload),
            Self::Failure { .. } => None,
        }
    }

    /// The failure category, if any.
    #[must_use]
    pub const fn error(&self) -> Option<ErrorCategory> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(*error),
        }
    }

    /// Serialize the external JSON shape.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }
}

#[derive(Serialize)]
struct FailureBody<'a> {
    success: bool,
    error: ErrorCategory,
    message: &'a str,
    details: Option<&'a Value>,
}

/// External JSON shape.
///
/// Object payloads are flattened next to `success`; a `success` field in
/// the payload itself wins. Non-object payloads are placed under `data`.
/// Failures always carry `details`, `null` when absent.
impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success {
                payload,
                from_cache,
            } => {
                let fields = payload.as_object();
                let mut map = serializer.serialize_map(None)?;
                match fields {
                    Some(fields) => {
                        for (key, value) in fields {
                            if *from_cache && key == "fromCache" {
                                continue;
                            }
                            map.serialize_entry(key, value)?;
                        }
                    }
                    None => map.serialize_entry("data", payload)?,
                }
                if !fields.is_some_and(|f| f.contains_key("success")) {
                    map.serialize_entry("success", &true)?;
                }
                if *from_cache {
                    map.serialize_entry("fromCache", &true)?;
                }
                map.end()
            }
            Self::Failure {
                error,
                message,
                details,
            } => FailureBody {
                success: false,
                error: *error,
                message: message.as_str(),
                details: details.as_ref(),
            }
            .serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    fn render(envelope: &Envelope) -> Value {
        serde_json::to_value(envelope).unwrap()
    }

    #[test_case(ErrorCategory::NetworkError, "network_error" ; "network")]
    #[test_case(ErrorCategory::Timeout, "timeout" ; "timeout")]
    #[test_case(ErrorCategory::Http(503), "http_503" ; "server error")]
    #[test_case(ErrorCategory::AuthenticationRequired, "authentication_required" ; "auth")]
    fn category_display_and_parse(category: ErrorCategory, text: &str) {
        assert_eq!(category.to_string(), text);
        assert_eq!(text.parse::<ErrorCategory>().ok(), Some(category));
    }

    #[test_case(400, false ; "bad request")]
    #[test_case(403, false ; "forbidden")]
    #[test_case(404, false ; "not found")]
    #[test_case(429, true ; "too many requests")]
    #[test_case(500, true ; "internal error")]
    #[test_case(503, true ; "unavailable")]
    fn http_retry_classification(status: u16, retryable: bool) {
        assert_eq!(ErrorCategory::Http(status).is_retryable(), retryable);
    }

    #[test]
    fn test_unknown_category_rejected() {
        assert!("http_abc".parse::<ErrorCategory>().is_err());
        assert!("boom".parse::<ErrorCategory>().is_err());
    }

    #[test]
    fn test_category_serde_as_string() {
        let json = serde_json::to_string(&ErrorCategory::Http(404)).unwrap();
        assert_eq!(json, "\"http_404\"");
        let back: ErrorCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCategory::Http(404));
    }

    #[test]
    fn test_success_flattens_object_payload() {
        let envelope = Envelope::success(json!({"items": [1, 2]}));
        assert_eq!(render(&envelope), json!({"success": true, "items": [1, 2]}));
    }

    #[test]
    fn test_cached_success_marks_from_cache() {
        let envelope = Envelope::cached(json!({"status": "ok"}));
        assert!(envelope.is_from_cache());
        assert_eq!(
            render(&envelope),
            json!({"success": true, "status": "ok", "fromCache": true})
        );
    }

    #[test]
    fn test_success_wraps_non_object_payload() {
        let envelope = Envelope::success(json!([1, 2, 3]));
        assert_eq!(render(&envelope), json!({"success": true, "data": [1, 2, 3]}));
    }

    #[test]
    fn test_payload_success_field_wins() {
        let envelope = Envelope::success(json!({"success": false, "reason": "quota"}));
        assert_eq!(render(&envelope)["success"], json!(false));
    }

    #[test]
    fn test_failure_shape() {
        let envelope = Envelope::failure(
            ErrorCategory::Http(500),
            "Internal Server Error",
            Some(json!({"message": "Internal Server Error"})),
        );
        assert!(!envelope.is_success());
        assert_eq!(envelope.error(), Some(ErrorCategory::Http(500)));
        assert_eq!(
            render(&envelope),
            json!({
                "success": false,
                "error": "http_500",
                "message": "Internal Server Error",
                "details": {"message": "Internal Server Error"},
            })
        );
    }

    #[test]
    fn test_cached_flag_is_not_duplicated() {
        let envelope = Envelope::cached(json!({"fromCache": false, "n": 1}));
        let text = envelope.to_json().unwrap();
        assert_eq!(text.matches("fromCache").count(), 1);
        assert_eq!(render(&envelope)["fromCache"], json!(true));
    }

    #[test]
    fn test_failure_without_details_renders_null() {
        let envelope = Envelope::failure(ErrorCategory::Timeout, "Request timeout after 10ms", None);
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"details\":null"));
        assert!(envelope.payload().is_none());
    }

    proptest! {
        #[test]
        fn prop_http_category_text_roundtrips(status in any::<u16>()) {
            let category = ErrorCategory::Http(status);
            let text = category.to_string();
            prop_assert_eq!(text.parse::<ErrorCategory>().ok(), Some(category));
            let json = serde_json::to_string(&category).unwrap();
            prop_assert_eq!(serde_json::from_str::<ErrorCategory>(&json).ok(), Some(category));
        }

        #[test]
        fn prop_retryable_matches_status_class(status in 100u16..600) {
            let expected = status >= 500 || status == 429;
            prop_assert_eq!(ErrorCategory::Http(status).is_retryable(), expected);
        }

        #[test]
        fn prop_success_shape_keeps_payload_fields(
            fields in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..6),
        ) {
            let payload: serde_json::Map<String, Value> =
                fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let rendered = render(&Envelope::success(Value::Object(payload)));
            for (key, value) in &fields {
                if key != "success" {
                    prop_assert_eq!(&rendered[key.as_str()], &json!(value));
                }
            }
            prop_assert!(rendered.get("success").is_some());
        }
    }
}
