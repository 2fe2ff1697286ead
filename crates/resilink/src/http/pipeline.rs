//! Request pipeline: auth, timeout, retry, classification, caching.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use resilink_proto::{Envelope, ErrorCategory};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{DEFAULT_TTL, ResponseCache};
use crate::error::ResilinkError;
use crate::identity::IdentityProvider;

use super::transport::{HttpRequest, HttpTransport};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Whether a request carries a bearer token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Never resolve a token.
    None,
    /// Attach a token when one is available.
    #[default]
    Optional,
    /// Fail with `authentication_required` when no token is available.
    Required,
}

/// One logical HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Extra headers; these override the JSON defaults.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// 1-based attempt number this call starts at.
    pub retry_attempt: u32,
    /// Cache key; only consulted for `GET`.
    pub cache_key: Option<String>,
    /// Authentication mode.
    pub auth: AuthMode,
    /// TTL for the cached response; the pipeline default when `None`.
    pub cache_ttl: Option<Duration>,
}

impl RequestDescriptor {
    /// Create a descriptor with default settings.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
            retry_attempt: 1,
            cache_key: None,
            auth: AuthMode::default(),
            cache_ttl: None,
        }
    }

    /// `GET url`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// `POST url` with a JSON body.
    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// `PUT url` with a JSON body.
    #[must_use]
    pub fn put(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, url).with_body(body)
    }

    /// `DELETE url`.
    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the starting attempt number.
    #[must_use]
    pub const fn with_retry_attempt(mut self, attempt: u32) -> Self {
        self.retry_attempt = attempt;
        self
    }

    /// Set the cache key.
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Set the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Set the authentication mode.
    #[must_use]
    pub const fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    /// Check the descriptor for misuse.
    ///
    /// # Errors
    ///
    /// Returns [`ResilinkError::InvalidDescriptor`] for an empty or
    /// unparseable URL, a zero attempt number, a zero timeout, or a header
    /// that is not valid HTTP.
    pub fn validate(&self) -> Result<(), ResilinkError> {
        if self.url.is_empty() {
            return Err(ResilinkError::InvalidDescriptor(
                "url cannot be empty".to_string(),
            ));
        }
        url::Url::parse(&self.url).map_err(|e| {
            ResilinkError::InvalidDescriptor(format!("invalid url '{}': {e}", self.url))
        })?;

        if self.retry_attempt == 0 {
            return Err(ResilinkError::InvalidDescriptor(
                "retry_attempt is 1-based".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(ResilinkError::InvalidDescriptor(
                "timeout must be greater than 0".to_string(),
            ));
        }

        for (name, value) in &self.headers {
            parse_header(name, value)?;
        }

        Ok(())
    }

    fn is_cacheable_read(&self) -> bool {
        self.method == Method::GET && self.cache_key.is_some()
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ResilinkError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ResilinkError::InvalidDescriptor(format!("invalid header name '{name}'")))?;
    let header_value = HeaderValue::from_str(value).map_err(|_| {
        ResilinkError::InvalidDescriptor(format!("invalid value for header '{name}'"))
    })?;
    Ok((header_name, header_value))
}

/// Linear retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay unit; attempt `n` waits `base_delay * n` before attempt `n + 1`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Whether another attempt may follow attempt `attempt`.
    #[must_use]
    pub const fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestFailure {
    /// No response was received.
    #[error("{0}")]
    Network(String),

    /// The attempt exceeded its timeout.
    #[error("Request timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The server answered with a non-2xx status.
    #[error("{}", http_message(.status, .body))]
    Http {
        /// Status code.
        status: u16,
        /// Decoded error body.
        body: Value,
    },
}

fn http_message(status: &u16, body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map_or_else(|| format!("HTTP {status}"), str::to_string)
}

impl RequestFailure {
    /// Envelope category for this failure.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::NetworkError,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Http { status, .. } => ErrorCategory::Http(*status),
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Fold the failure into a failure envelope.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        let category = self.category();
        let message = self.to_string();
        let details = match self {
            Self::Http { body, .. } => Some(body),
            Self::Network(_) | Self::Timeout(_) => None,
        };
        Envelope::failure(category, message, details)
    }
}

/// Decode a success body; non-JSON text is wrapped as `{message}`.
fn decode_success_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "message": raw }))
}

/// Decode an error body; non-JSON text is wrapped as `{message}`.
fn decode_error_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        let message = if raw.is_empty() { "Unknown error" } else { raw };
        json!({ "message": message })
    })
}

/// Executes [`RequestDescriptor`]s against an [`HttpTransport`].
pub struct RequestPipeline {
    transport: Arc<dyn HttpTransport>,
    identity: Arc<dyn IdentityProvider>,
    cache: ResponseCache,
    policy: RetryPolicy,
    default_ttl: Duration,
    cache_enabled: AtomicBool,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("policy", &self.policy)
            .field("default_ttl", &self.default_ttl)
            .field("cache_enabled", &self.cache_enabled())
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    /// Create a pipeline with the default retry policy and TTL.
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        identity: Arc<dyn IdentityProvider>,
        cache: ResponseCache,
    ) -> Self {
        Self {
            transport,
            identity,
            cache,
            policy: RetryPolicy::default(),
            default_ttl: DEFAULT_TTL,
            cache_enabled: AtomicBool::new(true),
        }
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the TTL used when a descriptor does not carry one.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Enable or disable caching.
    #[must_use]
    pub fn with_cache_enabled(self, enabled: bool) -> Self {
        self.set_cache_enabled(enabled);
        self
    }

    /// Toggle caching at runtime.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether caching is enabled.
    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::SeqCst)
    }

    /// The response cache.
    #[must_use]
    pub const fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// The retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute a request.
    ///
    /// Network, timeout and HTTP failures are returned as
    /// `Ok(Envelope::Failure { .. })`.
    ///
    /// # Errors
    ///
    /// Returns [`ResilinkError::InvalidDescriptor`] if the descriptor is
    /// malformed.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<Envelope, ResilinkError> {
        descriptor.validate()?;

        let cache_key = if descriptor.is_cacheable_read() && self.cache_enabled() {
            descriptor.cache_key.as_deref()
        } else {
            None
        };

        if let Some(key) = cache_key {
            if let Some(payload) = self.cache.get(key) {
                debug!(url = %descriptor.url, "served from cache");
                return Ok(Envelope::cached(payload));
            }
        }

        let token = self.resolve_token(descriptor.auth).await;
        if token.is_none() && descriptor.auth == AuthMode::Required {
            warn!(url = %descriptor.url, "authentication required but no session is available");
            return Ok(Envelope::failure(
                ErrorCategory::AuthenticationRequired,
                "Authentication required",
                None,
            ));
        }

        let headers = build_headers(&descriptor.headers, token)?;
        let body = descriptor
            .body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ResilinkError::InvalidDescriptor(format!("body is not encodable: {e}")))?;

        let mut attempt = descriptor.retry_attempt;
        loop {
            debug!(
                method = %descriptor.method,
                url = %descriptor.url,
                attempt,
                "sending request"
            );

            let request = HttpRequest {
                method: descriptor.method.clone(),
                url: descriptor.url.clone(),
                headers: headers.clone(),
                body: body.clone(),
            };

            let failure = match self.attempt(request, descriptor.timeout).await {
                Ok(payload) => {
                    if let Some(key) = cache_key {
                        let ttl = descriptor.cache_ttl.unwrap_or(self.default_ttl);
                        self.cache.set(key, &payload, ttl);
                    }
                    debug!(url = %descriptor.url, attempt, "request succeeded");
                    return Ok(Envelope::success(payload));
                }
                Err(failure) => failure,
            };

            if failure.is_retryable() && self.policy.allows_retry(attempt) {
                let delay = self.policy.delay_after(attempt);
                warn!(
                    url = %descriptor.url,
                    attempt,
                    max_attempts = self.policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            warn!(
                url = %descriptor.url,
                attempt,
                category = %failure.category(),
                error = %failure,
                "request failed"
            );
            return Ok(failure.into_envelope());
        }
    }

    async fn resolve_token(&self, auth: AuthMode) -> Option<HeaderValue> {
        if auth == AuthMode::None {
            return None;
        }

        let token = match self.identity.token().await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                warn!("no session token available, sending unauthenticated");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "session lookup failed, sending unauthenticated");
                return None;
            }
        };

        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("session token is not a valid header value, sending unauthenticated");
                None
            }
        }
    }

    async fn attempt(&self, request: HttpRequest, timeout: Duration) -> Result<Value, RequestFailure> {
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Err(_) => return Err(RequestFailure::Timeout(timeout)),
            Ok(Err(e)) => return Err(RequestFailure::Network(e.to_string())),
            Ok(Ok(response)) => response,
        };

        if response.is_success() {
            Ok(decode_success_body(&response.body))
        } else {
            Err(RequestFailure::Http {
                status: response.status,
                body: decode_error_body(&response.body),
            })
        }
    }
}

fn build_headers(
    extra: &[(String, String)],
    authorization: Option<HeaderValue>,
) -> Result<HeaderMap, ResilinkError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    for (name, value) in extra {
        let (name, value) = parse_header(name, value)?;
        headers.insert(name, value);
    }

    if let Some(value) = authorization {
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}
