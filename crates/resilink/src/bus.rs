//! String-keyed publish/subscribe registry.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::error;

/// Event handler. Identity is the `Arc` allocation, so keep the `Arc`
/// around to unsubscribe later.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Synchronous event bus.
///
/// Handlers run in registration order on the emitting thread. A panic
/// in one handler is logged and does not stop the others.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut events: Vec<_> = handlers.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        events.sort();
        f.debug_struct("EventBus").field("events", &events).finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `event`. Subscribing the same handler twice
    /// is a no-op.
    pub fn on(&self, event: &str, handler: Handler) {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(event.to_string()).or_default();
        if !list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            list.push(handler);
        }
    }

    /// Unsubscribe `handler` from `event`.
    pub fn off(&self, event: &str, handler: &Handler) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(event) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
            if list.is_empty() {
                handlers.remove(event);
            }
        }
    }

    /// Number of handlers subscribed to `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Invoke every handler subscribed to `event` with `payload`.
    pub fn emit(&self, event: &str, payload: &Value) {
        // Snapshot so handlers may subscribe, unsubscribe or emit.
        let snapshot: Vec<Handler> = match self.handlers.read().get(event) {
            Some(list) => list.clone(),
            None => return,
        };

        for handler in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                error!(event, panic = %message, "event handler panicked");
            }
        }
    }
}
