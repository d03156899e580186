// Connection status and the replay-latest status channel

use futures_util::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Health of a hub connection as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Uninitialized,
    Connecting,
    Connected,
    ConnectionSlow,
    Reconnecting,
    Reconnected,
    Closed,
}

impl ConnectionStatus {
    /// `Closed` is the only terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Closed)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Uninitialized
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Uninitialized => "uninitialized",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::ConnectionSlow => "connection_slow",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Reconnected => "reconnected",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct ChannelInner {
    current: ConnectionStatus,
    completed: bool,
    observers: Vec<mpsc::UnboundedSender<ConnectionStatus>>,
}

/// Multicast status signal that always holds a current value.
///
/// New observers receive the current value first and then every pushed value
/// in push order. Delivery happens under the channel lock, so every observer
/// sees the same sequence. Once `Closed` has been pushed the channel is
/// complete: all observer streams end and further pushes are dropped.
pub struct StatusChannel {
    inner: Mutex<ChannelInner>,
}

impl StatusChannel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ChannelInner {
                current: ConnectionStatus::Uninitialized,
                completed: false,
                observers: Vec::new(),
            }),
        }
    }

    /// Most recently pushed status
    pub fn current(&self) -> ConnectionStatus {
        self.inner.lock().current
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    /// Attach a new observer
    pub fn observe(&self) -> StatusStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();

        // Receiver is alive, the send cannot fail
        let _ = tx.send(inner.current);
        if !inner.completed {
            inner.observers.push(tx);
        }

        StatusStream { rx }
    }

    /// Publish a new status. Returns `false` if the channel already completed
    /// and the value was dropped.
    pub fn push(&self, status: ConnectionStatus) -> bool {
        let mut inner = self.inner.lock();

        if inner.completed {
            debug!(%status, "Status channel already closed, dropping status");
            return false;
        }

        debug!(from = %inner.current, to = %status, "Status transition");
        inner.current = status;
        inner.observers.retain(|tx| tx.send(status).is_ok());

        if status.is_terminal() {
            inner.completed = true;
            inner.observers.clear();
        }

        true
    }

    /// Number of live observers
    pub fn observer_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.observers.retain(|tx| !tx.is_closed());
        inner.observers.len()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StatusChannel")
            .field("current", &inner.current)
            .field("completed", &inner.completed)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

/// Ordered stream of status values for a single observer
#[derive(Debug)]
pub struct StatusStream {
    rx: mpsc::UnboundedReceiver<ConnectionStatus>,
}

impl StatusStream {
    /// Next status, or `None` once the channel has completed
    pub async fn recv(&mut self) -> Option<ConnectionStatus> {
        self.rx.recv().await
    }

    /// Next status if one is already queued
    pub fn try_recv(&mut self) -> Option<ConnectionStatus> {
        self.rx.try_recv().ok()
    }
}

impl Stream for StatusStream {
    type Item = ConnectionStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Observe-only view of a [`StatusChannel`] handed out to callers
#[derive(Debug, Clone)]
pub struct StatusSignal {
    channel: Arc<StatusChannel>,
}

impl StatusSignal {
    pub(crate) fn new(channel: Arc<StatusChannel>) -> Self {
        Self { channel }
    }

    pub fn observe(&self) -> StatusStream {
        self.channel.observe()
    }

    pub fn current(&self) -> ConnectionStatus {
        self.channel.current()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_completed()
    }
}
