// WebSocket transport for hub connections
// Opens the socket with the identity header, routes inbound frames to named
// proxies and reports slow / reconnecting / reconnected / closed

use super::{EventHandler, EventHandlers, HandlerId, Transport, TransportConfig, TransportEvent};
use crate::config::{ConnectionConfig, IDENTITY_HEADER};
use crate::error::{HubError, HubResult};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Inbound messages buffered per proxy before slow receivers start lagging
const PROXY_BUFFER: usize = 256;

/// Frame layout on the wire: the data is opaque to the transport
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    channel: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Serialize)]
struct OutboundEnvelope<'a> {
    channel: &'a str,
    data: &'a Value,
}

struct Inner {
    address: String,
    identity: String,
    config: TransportConfig,
    handlers: EventHandlers,
    writer: Mutex<Option<WsSink>>,
    channels: DashMap<String, broadcast::Sender<Value>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    /// Set once a socket has been opened; `closed` is only reported after that
    opened: AtomicBool,
    stopping: AtomicBool,
    closed: AtomicBool,
}

impl Inner {
    async fn open(&self) -> HubResult<WsStream> {
        let mut request = self
            .address
            .as_str()
            .into_client_request()
            .map_err(|e| HubError::transport_start_with("Invalid hub address", e))?;
        let identity = HeaderValue::from_str(&self.identity)
            .map_err(|e| HubError::transport_start_with("Invalid identity header value", e))?;
        request.headers_mut().insert(IDENTITY_HEADER, identity);

        let ws_config = WebSocketConfig {
            max_frame_size: Some(self.config.max_frame_size),
            ..Default::default()
        };

        info!("Connecting to WebSocket: {}", self.address);
        let connecting = connect_async_with_config(request, Some(ws_config), false);
        match timeout(self.config.connection_timeout, connecting).await {
            Ok(Ok((stream, _response))) => {
                info!("WebSocket connected successfully");
                Ok(stream)
            }
            Ok(Err(e)) => Err(HubError::transport_start_with(
                format!("WebSocket connection to {} failed", self.address),
                e,
            )),
            Err(_) => Err(HubError::transport_start(format!(
                "WebSocket connection to {} timed out after {:?}",
                self.address, self.config.connection_timeout
            ))),
        }
    }

    async fn install_writer(&self, sink: WsSink) {
        *self.writer.lock().await = Some(sink);
        self.opened.store(true, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
    }

    async fn close_writer(&self) -> HubResult<()> {
        let sink = self.writer.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        match sink {
            Some(mut sink) => sink
                .close()
                .await
                .map_err(|e| HubError::transport_stop(format!("Failed to close WebSocket: {}", e))),
            None => Ok(()),
        }
    }

    async fn send(&self, message: Message) -> HubResult<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink
                .send(message)
                .await
                .map_err(|e| HubError::send("Failed to write frame", e)),
            None => Err(HubError::not_connected("WebSocket not connected")),
        }
    }

    fn emit_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Transport closed");
            self.handlers.emit(TransportEvent::Closed);
        }
    }

    fn route(&self, text: &str) {
        let envelope: InboundEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Dropping frame without a channel envelope");
                return;
            }
        };

        match self.channels.get(&envelope.channel) {
            // A send error only means nobody is subscribed right now
            Some(tx) => {
                let _ = tx.send(envelope.data);
            }
            None => debug!(channel = %envelope.channel, "No proxy for inbound frame"),
        }
    }

    /// Read frames until the socket goes away
    async fn pump(&self, source: &mut WsSource) {
        let mut ticker = interval(self.config.keepalive_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_frame = Instant::now();
        let mut slow = false;

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(message)) => {
                        last_frame = Instant::now();
                        slow = false;
                        match message {
                            Message::Text(text) => self.route(&text),
                            Message::Close(frame) => {
                                info!(?frame, "WebSocket closed by server");
                                return;
                            }
                            Message::Binary(data) => {
                                debug!("Ignoring binary frame ({} bytes)", data.len());
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        return;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !slow && last_frame.elapsed() >= self.config.slow_threshold {
                        slow = true;
                        warn!(silence = ?last_frame.elapsed(), "Connection slow");
                        self.handlers.emit(TransportEvent::Slow);
                    }
                    if let Err(e) = self.send(Message::Ping(Vec::new())).await {
                        debug!(error = %e, "Keepalive ping failed");
                    }
                }
            }
        }
    }
}

async fn run_reader(inner: Arc<Inner>, mut source: WsSource) {
    loop {
        inner.pump(&mut source).await;
        inner.connected.store(false, Ordering::SeqCst);
        inner.writer.lock().await.take();

        if inner.stopping.load(Ordering::SeqCst) {
            return;
        }
        if !inner.config.enable_auto_reconnect {
            inner.emit_closed();
            return;
        }

        inner.handlers.emit(TransportEvent::Reconnecting);
        let policy = RetryPolicy::from_transport(&inner.config);
        info!(attempts = policy.max_attempts(), "Reconnecting");

        match policy.execute_async(|| inner.open()).await {
            Ok(stream) => {
                if inner.stopping.load(Ordering::SeqCst) {
                    return;
                }
                let (sink, next_source) = stream.split();
                inner.install_writer(sink).await;
                if inner.stopping.load(Ordering::SeqCst) {
                    let _ = inner.close_writer().await;
                    return;
                }
                source = next_source;
                info!("Reconnected");
                inner.handlers.emit(TransportEvent::Reconnected);
            }
            Err(e) => {
                warn!(error = %e, "Reconnect attempts exhausted");
                inner.emit_closed();
                return;
            }
        }
    }
}

/// [`Transport`] over a WebSocket, one socket per instance
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

impl WebSocketTransport {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                address: config.address.clone(),
                identity: config.identity.clone(),
                config: config.transport.clone(),
                handlers: EventHandlers::new(),
                writer: Mutex::new(None),
                channels: DashMap::new(),
                reader: parking_lot::Mutex::new(None),
                connected: AtomicBool::new(false),
                opened: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Proxy = WebSocketProxy;

    async fn start(&self) -> HubResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) || self.inner.stopping.load(Ordering::SeqCst) {
            return Err(HubError::transport_start("Transport already closed"));
        }

        let stream = self.inner.open().await?;
        let (sink, source) = stream.split();
        self.inner.install_writer(sink).await;

        {
            // stop() raises `stopping` before it empties the reader slot, so
            // checking under the slot lock means one of the two sides cleans up
            let mut slot = self.inner.reader.lock();
            if !self.inner.stopping.load(Ordering::SeqCst) {
                let reader = tokio::spawn(run_reader(Arc::clone(&self.inner), source));
                if let Some(previous) = slot.replace(reader) {
                    previous.abort();
                }
                return Ok(());
            }
        }

        info!("Transport stopped during handshake, closing the new socket");
        if let Err(e) = self.inner.close_writer().await {
            debug!(error = %e, "Closing abandoned socket failed");
        }
        Err(HubError::transport_start("Transport stopped while connecting"))
    }

    async fn stop(&self) -> HubResult<()> {
        self.inner.stopping.store(true, Ordering::SeqCst);
        let reader = self.inner.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }

        let result = self.inner.close_writer().await;

        // Nothing was ever connected after a failed start, so there is no
        // closure to report and the status stays where the start left it
        if self.inner.opened.load(Ordering::SeqCst) {
            self.inner.emit_closed();
        } else {
            debug!("Stopping a transport that never opened");
        }
        result
    }

    fn subscribe(&self, event: TransportEvent, handler: EventHandler) -> HandlerId {
        self.inner.handlers.add(event, handler)
    }

    fn unsubscribe(&self, event: TransportEvent, id: HandlerId) {
        self.inner.handlers.remove(event, id)
    }

    fn create_proxy(&self, name: &str) -> WebSocketProxy {
        let inbound = self
            .inner
            .channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(PROXY_BUFFER).0)
            .clone();

        WebSocketProxy {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
            inbound,
        }
    }
}

/// Named sub-channel over a [`WebSocketTransport`]
pub struct WebSocketProxy {
    name: String,
    inner: Arc<Inner>,
    inbound: broadcast::Sender<Value>,
}

impl WebSocketProxy {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send opaque data to the hub on this proxy's channel
    pub async fn send(&self, data: &Value) -> HubResult<()> {
        let envelope = OutboundEnvelope {
            channel: &self.name,
            data,
        };
        let text = serde_json::to_string(&envelope)
            .map_err(|e| HubError::serialization("Failed to encode envelope", e))?;
        self.inner.send(Message::Text(text)).await
    }

    /// Receive everything the hub sends on this proxy's channel
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.inbound.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WebSocketProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketProxy")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
