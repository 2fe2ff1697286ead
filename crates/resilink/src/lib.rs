//! resilink - network resilience layer for a web API client.
//!
//! Two channels to one backend:
//!
//! - [`http::RequestPipeline`]: JSON request/response calls with bearer
//!   auth, timeouts, linear retry and a TTL [`cache::ResponseCache`],
//!   reporting every outcome as an [`Envelope`].
//! - [`socket::ConnectionManager`]: a long-lived WebSocket with
//!   exponential-backoff reconnects, heartbeats, an outbound queue and
//!   typed dispatch of server frames onto an [`bus::EventBus`].

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod socket;

use std::sync::Arc;

pub use bus::{EventBus, Handler, handler};
pub use cache::ResponseCache;
pub use config::ResilinkConfig;
pub use error::ResilinkError;
pub use http::{ApiClient, RequestDescriptor, RequestOptions, RequestPipeline};
pub use identity::{IdentityProvider, StaticIdentity};
pub use resilink_proto::{
    ClientFrame, CustomFrame, Envelope, ErrorCategory, InboundFrame, OutboundFrame, ServerFrame,
};
pub use socket::{ConnectionManager, ConnectionState, EventKind};

use cache::Storage;
use http::HttpTransport;
use socket::{ManagerOptions, SocketFactory};

/// Build an [`ApiClient`] from configuration.
///
/// # Errors
///
/// Returns an error if the configured base URL is invalid.
pub fn api_client(
    config: &ResilinkConfig,
    transport: Arc<dyn HttpTransport>,
    identity: Arc<dyn IdentityProvider>,
    storage: Arc<dyn Storage>,
) -> Result<ApiClient, ResilinkError> {
    let cache = ResponseCache::new(storage).with_prefix(config.cache.prefix.clone());
    let pipeline = RequestPipeline::new(transport, identity, cache)
        .with_retry_policy(config.http.retry_policy())
        .with_default_ttl(config.http.cache_ttl())
        .with_cache_enabled(config.http.cache_enabled);

    Ok(ApiClient::new(config.http.base_url.clone(), Arc::new(pipeline))?.with_timeout(config.http.timeout()))
}

/// Build a [`ConnectionManager`] from configuration.
#[must_use]
pub fn connection_manager(
    config: &ResilinkConfig,
    factory: Arc<dyn SocketFactory>,
    user_id: Option<String>,
) -> ConnectionManager {
    let options = ManagerOptions {
        reconnect: config.socket.reconnect_policy(),
        heartbeat: config.socket.heartbeat_config(),
        user_id,
    };
    ConnectionManager::with_options(config.socket.url.clone(), factory, options)
}
