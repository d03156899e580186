// Test harness: an in-memory transport the tests drive by hand

#![allow(dead_code)]

use async_trait::async_trait;
use hublink_core::error::{HubError, HubResult};
use hublink_core::status::{ConnectionStatus, StatusStream};
use hublink_core::transport::{EventHandler, EventHandlers, HandlerId, Transport, TransportEvent};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

type StartOutcome = Option<Result<(), String>>;

/// Transport whose start outcome, stop behaviour and events are test-controlled
pub struct FakeTransport {
    handlers: EventHandlers,
    gate: watch::Sender<StartOutcome>,
    stop_fails: AtomicBool,
    /// A start has succeeded, so stopping reports `Closed` like a real socket
    opened: AtomicBool,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub proxies_created: AtomicUsize,
    /// Time spent inside `create_proxy`, to widen race windows
    pub proxy_build_delay: Duration,
}

impl FakeTransport {
    fn with_gate(outcome: StartOutcome) -> Self {
        let (gate, _) = watch::channel(outcome);
        Self {
            handlers: EventHandlers::new(),
            gate,
            stop_fails: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            proxies_created: AtomicUsize::new(0),
            proxy_build_delay: Duration::from_millis(0),
        }
    }

    /// Start succeeds immediately
    pub fn new() -> Self {
        Self::with_gate(Some(Ok(())))
    }

    /// Start fails immediately with `message`
    pub fn failing(message: &str) -> Self {
        Self::with_gate(Some(Err(message.to_string())))
    }

    /// Start suspends until [`FakeTransport::complete_start`] is called
    pub fn gated() -> Self {
        Self::with_gate(None)
    }

    pub fn with_proxy_delay(mut self, delay: Duration) -> Self {
        self.proxy_build_delay = delay;
        self
    }

    pub fn complete_start(&self, outcome: Result<(), &str>) {
        self.gate.send_replace(Some(outcome.map_err(str::to_string)));
    }

    pub fn fail_stops(&self) {
        self.stop_fails.store(true, Ordering::SeqCst);
    }

    /// Raise a lifecycle notification, as the network layer would
    pub fn fire(&self, event: TransportEvent) {
        self.handlers.emit(event);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.total()
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Proxy = FakeProxy;

    async fn start(&self) -> HubResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let outcome: StartOutcome = (*gate
            .wait_for(Option::is_some)
            .await
            .map_err(|_| HubError::transport_start("start gate dropped"))?)
        .clone();

        match outcome {
            Some(Ok(())) => {
                self.opened.store(true, Ordering::SeqCst);
                Ok(())
            }
            Some(Err(message)) => Err(HubError::transport_start(message)),
            None => Err(HubError::transport_start("start gate empty")),
        }
    }

    async fn stop(&self) -> HubResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.opened.swap(false, Ordering::SeqCst) {
            self.handlers.emit(TransportEvent::Closed);
        }
        if self.stop_fails.load(Ordering::SeqCst) {
            return Err(HubError::transport_stop("socket already gone"));
        }
        Ok(())
    }

    fn subscribe(&self, event: TransportEvent, handler: EventHandler) -> HandlerId {
        self.handlers.add(event, handler)
    }

    fn unsubscribe(&self, event: TransportEvent, id: HandlerId) {
        self.handlers.remove(event, id)
    }

    fn create_proxy(&self, name: &str) -> FakeProxy {
        let serial = self.proxies_created.fetch_add(1, Ordering::SeqCst);
        if !self.proxy_build_delay.is_zero() {
            std::thread::sleep(self.proxy_build_delay);
        }
        FakeProxy {
            name: name.to_string(),
            serial,
        }
    }
}

#[derive(Debug)]
pub struct FakeProxy {
    pub name: String,
    pub serial: usize,
}

/// Next status, failing the test if none arrives in time
pub async fn next_status(stream: &mut StatusStream) -> Option<ConnectionStatus> {
    timeout(WAIT, stream.recv())
        .await
        .expect("timed out waiting for a status")
}

/// Collect statuses until `last` (inclusive)
pub async fn statuses_until(stream: &mut StatusStream, last: ConnectionStatus) -> Vec<ConnectionStatus> {
    let mut seen = Vec::new();
    while let Some(status) = next_status(stream).await {
        seen.push(status);
        if status == last {
            break;
        }
    }
    seen
}

/// Poll `condition` until it holds or the wait budget runs out
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
