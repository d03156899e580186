// Transport abstraction consumed by the connection core
// A transport owns the physical link to the hub and reports lifecycle events

use crate::error::HubResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

pub use self::config::{TransportConfig, TransportConfigBuilder};
pub use self::websocket::{WebSocketProxy, WebSocketTransport};

mod config;
mod websocket;

/// Lifecycle notifications a transport can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEvent {
    /// The link is gone for good; no reconnect will follow
    Closed,
    /// The link is up but degraded
    Slow,
    Reconnecting,
    Reconnected,
}

impl TransportEvent {
    pub const ALL: [TransportEvent; 4] = [
        TransportEvent::Closed,
        TransportEvent::Slow,
        TransportEvent::Reconnecting,
        TransportEvent::Reconnected,
    ];
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportEvent::Closed => "closed",
            TransportEvent::Slow => "slow",
            TransportEvent::Reconnecting => "reconnecting",
            TransportEvent::Reconnected => "reconnected",
        };
        f.write_str(name)
    }
}

/// Callback invoked when a transport event fires
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Token returned by [`Transport::subscribe`], used to deregister a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Transport handle driven by a [`Connection`](crate::connection::Connection)
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Named sub-channel handed out by the proxy registry
    type Proxy: Send + Sync + 'static;

    /// Open the link. May suspend on network I/O.
    async fn start(&self) -> HubResult<()>;

    /// Close the link. Callers treat failures as best-effort.
    async fn stop(&self) -> HubResult<()>;

    /// Register a handler for one lifecycle event.
    ///
    /// Implementations must not hold internal locks while invoking handlers:
    /// a handler may call [`Transport::unsubscribe`] from inside the callback.
    fn subscribe(&self, event: TransportEvent, handler: EventHandler) -> HandlerId;

    fn unsubscribe(&self, event: TransportEvent, id: HandlerId);

    /// Build the named sub-channel. Must not block on the network.
    fn create_proxy(&self, name: &str) -> Self::Proxy;
}

/// Handler registry shared by transport implementations
#[derive(Default)]
pub struct EventHandlers {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<TransportEvent, Vec<(HandlerId, EventHandler)>>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: TransportEvent, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().entry(event).or_default().push((id, handler));
        id
    }

    pub fn remove(&self, event: TransportEvent, id: HandlerId) {
        if let Some(list) = self.handlers.lock().get_mut(&event) {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    /// Invoke every handler registered for `event`, outside the lock
    pub fn emit(&self, event: TransportEvent) {
        let snapshot: Vec<EventHandler> = self
            .handlers
            .lock()
            .get(&event)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        trace!(%event, handlers = snapshot.len(), "Emitting transport event");
        for handler in snapshot {
            handler();
        }
    }

    pub fn count(&self, event: TransportEvent) -> usize {
        self.handlers.lock().get(&event).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("total", &self.total())
            .finish()
    }
}
