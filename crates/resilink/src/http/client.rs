//! Endpoint-level API client over the request pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use resilink_proto::Envelope;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::cache::derive_key;
use crate::error::ResilinkError;

use super::pipeline::{AuthMode, RequestDescriptor, RequestPipeline};

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Authentication mode.
    pub auth: AuthMode,
    /// Whether a `GET` may be served from and written to the cache.
    pub cache: bool,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Per-attempt timeout; the client default when `None`.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            auth: AuthMode::Optional,
            cache: true,
            headers: Vec::new(),
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// Options that bypass the cache.
    #[must_use]
    pub fn uncached() -> Self {
        Self {
            cache: false,
            ..Self::default()
        }
    }
}

/// API client rooted at a base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    pipeline: Arc<RequestPipeline>,
    timeout: Option<Duration>,
}

impl ApiClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute URL.
    pub fn new(base_url: impl Into<String>, pipeline: Arc<RequestPipeline>) -> Result<Self, ResilinkError> {
        let base_url = base_url.into();
        Url::parse(&base_url)
            .map_err(|e| ResilinkError::Config(format!("invalid base url '{base_url}': {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            pipeline,
            timeout: None,
        })
    }

    /// Default per-attempt timeout for calls without one.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    fn descriptor(&self, method: Method, url: String, options: RequestOptions) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::new(method, url).with_auth(options.auth);
        descriptor.headers = options.headers;
        if let Some(timeout) = options.timeout.or(self.timeout) {
            descriptor = descriptor.with_timeout(timeout);
        }
        descriptor
    }

    /// `GET endpoint?params`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the resulting request is malformed.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
        options: RequestOptions,
    ) -> Result<Envelope, ResilinkError> {
        let mut url = Url::parse(&self.endpoint_url(endpoint))
            .map_err(|e| ResilinkError::InvalidDescriptor(format!("invalid endpoint '{endpoint}': {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }

        let cache = options.cache;
        let mut descriptor = self.descriptor(Method::GET, url.to_string(), options);
        if cache {
            descriptor = descriptor.with_cache_key(derive_key(endpoint, params));
        }
        self.pipeline.execute(descriptor).await
    }

    /// `POST endpoint` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error only if the resulting request is malformed.
    pub async fn post(
        &self,
        endpoint: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<Envelope, ResilinkError> {
        let descriptor = self
            .descriptor(Method::POST, self.endpoint_url(endpoint), options)
            .with_body(body);
        self.pipeline.execute(descriptor).await
    }

    /// `PUT endpoint` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error only if the resulting request is malformed.
    pub async fn put(
        &self,
        endpoint: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<Envelope, ResilinkError> {
        let descriptor = self
            .descriptor(Method::PUT, self.endpoint_url(endpoint), options)
            .with_body(body);
        self.pipeline.execute(descriptor).await
    }

    /// `DELETE endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the resulting request is malformed.
    pub async fn delete(&self, endpoint: &str, options: RequestOptions) -> Result<Envelope, ResilinkError> {
        let descriptor = self.descriptor(Method::DELETE, self.endpoint_url(endpoint), options);
        self.pipeline.execute(descriptor).await
    }

    /// `GET /health`, unauthenticated and never cached.
    ///
    /// # Errors
    ///
    /// Returns an error only if the base URL cannot form a request.
    pub async fn health_check(&self) -> Result<Envelope, ResilinkError> {
        let options = RequestOptions {
            auth: AuthMode::None,
            ..RequestOptions::uncached()
        };
        self.get("/health", &BTreeMap::new(), options).await
    }

    /// Drop cached responses whose key contains `pattern`, or all of them.
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        let removed = self.pipeline.cache().invalidate(pattern);
        info!(pattern = pattern.unwrap_or("*"), removed, "cache cleared");
        removed
    }

    /// Toggle response caching.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.pipeline.set_cache_enabled(enabled);
        info!(enabled, "response caching toggled");
    }
}
