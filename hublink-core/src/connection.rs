// Hub connection: one transport, one status channel, one proxy registry

use crate::config::ConnectionConfig;
use crate::error::HubResult;
use crate::lifecycle::{ActivationState, ConnectionLifecycle, ReadySignal};
use crate::logging::{connection_span, generate_connection_id};
use crate::merger::LifecycleEventMerger;
use crate::proxy::ProxyRegistry;
use crate::status::{ConnectionStatus, StatusChannel, StatusSignal};
use crate::transport::{Transport, WebSocketTransport};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, Span};
use uuid::Uuid;

/// Connection over the bundled WebSocket transport
pub type HubConnection = Connection<WebSocketTransport>;

/// A single logical connection to a hub.
///
/// Built once per connection attempt series and never reused after `Closed`;
/// whoever owns reconnect policy creates a fresh `Connection` instead.
pub struct Connection<T: Transport> {
    id: Uuid,
    span: Span,
    transport: Arc<T>,
    status: Arc<StatusChannel>,
    lifecycle: ConnectionLifecycle<T>,
    proxies: ProxyRegistry<T>,
    // Kept for its Drop: detaches the transport handlers
    _merger: LifecycleEventMerger<T>,
}

impl Connection<WebSocketTransport> {
    /// Connection to `config.address`, authenticated with `config.identity`.
    ///
    /// The configuration is validated first, so one deserialized from a file
    /// gets the same checks as one from the builder.
    pub fn open(config: &ConnectionConfig) -> HubResult<Self> {
        let config = config.clone().validate()?;
        Ok(Self::build(WebSocketTransport::new(&config), &config.address))
    }

    /// Validate address and identity, then build the connection
    pub fn connect_to(address: impl Into<String>, identity: impl Into<String>) -> HubResult<Self> {
        Self::open(&ConnectionConfig::new(address, identity)?)
    }
}

impl<T: Transport> Connection<T> {
    /// Wrap an arbitrary transport
    pub fn with_transport(transport: T) -> Self {
        Self::build(transport, "custom")
    }

    fn build(transport: T, address: &str) -> Self {
        let id = generate_connection_id();
        let span = connection_span(&id, address);

        let transport = Arc::new(transport);
        let status = Arc::new(StatusChannel::new());
        let merger = span.in_scope(|| {
            LifecycleEventMerger::attach(Arc::clone(&transport), Arc::clone(&status))
        });
        let lifecycle = ConnectionLifecycle::new(Arc::clone(&transport), Arc::clone(&status));
        let proxies = ProxyRegistry::new(Arc::clone(&transport));
        span.in_scope(|| debug!("Connection created"));

        Self {
            id,
            span,
            transport,
            status,
            lifecycle,
            proxies,
            _merger: merger,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Shared ready-signal; see [`ConnectionLifecycle::start`]
    pub fn start(&self) -> HubResult<ReadySignal<T>> {
        let _guard = self.span.enter();
        self.lifecycle.start()
    }

    /// Observe-only status signal
    pub fn status(&self) -> StatusSignal {
        StatusSignal::new(Arc::clone(&self.status))
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.status.current()
    }

    /// Get or create the named proxy
    pub fn get_proxy(&self, name: &str) -> HubResult<Arc<T::Proxy>> {
        let _guard = self.span.enter();
        self.proxies.get_proxy(name)
    }

    pub fn proxy_names(&self) -> Vec<String> {
        self.proxies.names()
    }

    pub fn activation_state(&self) -> ActivationState {
        self.lifecycle.state()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("status", &self.status.current())
            .field("lifecycle", &self.lifecycle)
            .field("proxies", &self.proxies)
            .finish()
    }
}
