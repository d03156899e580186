// Connection lifecycle: one start attempt, shared by every interested party,
// torn down when the last of them lets go

use crate::error::{HubError, HubResult};
use crate::status::{ConnectionStatus, StatusChannel};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Activation state of the shared ready-signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// No subscriber has attached yet
    NotStarted,
    /// Transport start in flight
    Starting,
    Started,
    /// Transport start failed; subscribers hold the error
    Faulted,
    /// Last subscriber detached and the transport was stopped. Terminal.
    Stopped,
}

type Outcome = Option<Result<(), Arc<HubError>>>;

struct ActivationInner {
    state: ActivationState,
    subscribers: usize,
    start_task: Option<JoinHandle<()>>,
}

struct Activation<T: Transport> {
    transport: Arc<T>,
    status: Arc<StatusChannel>,
    inner: Mutex<ActivationInner>,
    outcome: watch::Sender<Outcome>,
    start_attempts: AtomicUsize,
}

impl<T: Transport> Activation<T> {
    fn subscribe(self: &Arc<Self>) -> HubResult<ReadySubscription<T>> {
        let runtime = Handle::try_current().map_err(|e| HubError::no_runtime(e.to_string()))?;
        let mut inner = self.inner.lock();

        match inner.state {
            ActivationState::Stopped => return Err(HubError::ConnectionStopped),
            ActivationState::NotStarted => {
                inner.state = ActivationState::Starting;
                inner.subscribers = 1;
                self.start_attempts.fetch_add(1, Ordering::SeqCst);

                info!("First subscriber attached, starting transport");
                self.status.push(ConnectionStatus::Connecting);

                let activation = Arc::clone(self);
                inner.start_task = Some(runtime.spawn(async move { activation.run_start().await }));
            }
            _ => {
                inner.subscribers += 1;
                debug!(subscribers = inner.subscribers, "Subscriber attached to running activation");
            }
        }

        Ok(ReadySubscription {
            activation: Arc::clone(self),
            outcome: self.outcome.subscribe(),
            released: false,
        })
    }

    async fn run_start(self: Arc<Self>) {
        let result = self.transport.start().await;

        let mut inner = self.inner.lock();
        inner.start_task = None;
        if inner.state != ActivationState::Starting {
            // Last subscriber left while the start was completing
            return;
        }

        match result {
            Ok(()) => {
                inner.state = ActivationState::Started;
                self.status.push(ConnectionStatus::Connected);
                info!("Transport started");
                self.outcome.send_replace(Some(Ok(())));
            }
            Err(err) => {
                error!(error = %err, "Transport start failed");
                inner.state = ActivationState::Faulted;
                self.outcome.send_replace(Some(Err(Arc::new(err))));
            }
        }
    }

    /// Drop one subscriber. Returns `true` if the caller must stop the transport.
    fn release(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.subscribers = inner.subscribers.saturating_sub(1);
        if inner.subscribers > 0 || inner.state == ActivationState::Stopped {
            return false;
        }

        let previous = inner.state;
        inner.state = ActivationState::Stopped;
        if let Some(task) = inner.start_task.take() {
            task.abort();
        }
        if previous == ActivationState::Starting {
            self.outcome
                .send_replace(Some(Err(Arc::new(HubError::StartCancelled))));
        }

        info!(?previous, "Last subscriber detached, stopping transport");
        true
    }

    fn stop_in_background(&self) {
        let transport = Arc::clone(&self.transport);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(stop_transport(transport));
            }
            Err(_) => {
                error!("No Tokio runtime available to stop the transport, leaving it running");
            }
        }
    }
}

async fn stop_transport<T: Transport>(transport: Arc<T>) {
    match transport.stop().await {
        Ok(()) => info!("Transport stopped"),
        Err(err) => warn!(error = %err, "Transport stop failed, ignoring"),
    }
}

/// Owner of the one-shot start operation of a connection
pub struct ConnectionLifecycle<T: Transport> {
    activation: Arc<Activation<T>>,
    initialized: AtomicBool,
}

impl<T: Transport> ConnectionLifecycle<T> {
    pub fn new(transport: Arc<T>, status: Arc<StatusChannel>) -> Self {
        let (outcome, _) = watch::channel(None);

        Self {
            activation: Arc::new(Activation {
                transport,
                status,
                inner: Mutex::new(ActivationInner {
                    state: ActivationState::NotStarted,
                    subscribers: 0,
                    start_task: None,
                }),
                outcome,
                start_attempts: AtomicUsize::new(0),
            }),
            initialized: AtomicBool::new(false),
        }
    }

    /// Hand out the shared ready-signal.
    ///
    /// Nothing happens until the first subscriber attaches. Fails with
    /// [`HubError::AlreadyInitialized`] on every call after the first.
    pub fn start(&self) -> HubResult<ReadySignal<T>> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("start() called more than once");
            return Err(HubError::AlreadyInitialized);
        }

        Ok(ReadySignal {
            activation: Arc::clone(&self.activation),
        })
    }

    pub fn state(&self) -> ActivationState {
        self.activation.inner.lock().state
    }

    pub fn subscriber_count(&self) -> usize {
        self.activation.inner.lock().subscribers
    }

    /// Number of transport start attempts made so far (0 or 1)
    pub fn start_attempts(&self) -> usize {
        self.activation.start_attempts.load(Ordering::SeqCst)
    }
}

impl<T: Transport> fmt::Debug for ConnectionLifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish()
    }
}

/// Shared, ref-counted, lazily activated ready-signal returned by `start()`
pub struct ReadySignal<T: Transport> {
    activation: Arc<Activation<T>>,
}

impl<T: Transport> Clone for ReadySignal<T> {
    fn clone(&self) -> Self {
        Self {
            activation: Arc::clone(&self.activation),
        }
    }
}

impl<T: Transport> ReadySignal<T> {
    /// Attach a subscriber. The first one triggers the transport start.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self) -> HubResult<ReadySubscription<T>> {
        self.activation.subscribe()
    }

    /// Attach and wait until the transport is ready.
    ///
    /// On failure the subscription is released again before returning.
    pub async fn connect(&self) -> HubResult<ReadySubscription<T>> {
        let mut subscription = self.subscribe()?;
        match subscription.ready().await {
            Ok(()) => Ok(subscription),
            Err(err) => {
                subscription.detach().await;
                Err(err)
            }
        }
    }

    pub fn state(&self) -> ActivationState {
        self.activation.inner.lock().state
    }

    pub fn subscriber_count(&self) -> usize {
        self.activation.inner.lock().subscribers
    }
}

impl<T: Transport> fmt::Debug for ReadySignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// One attached party. Keeps the transport started until detached or dropped.
pub struct ReadySubscription<T: Transport> {
    activation: Arc<Activation<T>>,
    outcome: watch::Receiver<Outcome>,
    released: bool,
}

impl<T: Transport> ReadySubscription<T> {
    /// Wait for the shared start attempt to finish
    pub async fn ready(&mut self) -> HubResult<()> {
        let outcome: Outcome = (*self
            .outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| HubError::StartCancelled)?)
        .clone();

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(HubError::Shared(err)),
            None => Err(HubError::StartCancelled),
        }
    }

    /// `true` once the transport start has succeeded
    pub fn is_ready(&self) -> bool {
        matches!(*self.outcome.borrow(), Some(Ok(())))
    }

    /// Detach and, if this was the last subscriber, stop the transport before
    /// returning. Stop failures are logged, never returned.
    pub async fn detach(mut self) {
        self.released = true;
        if self.activation.release() {
            stop_transport(Arc::clone(&self.activation.transport)).await;
        }
    }
}

impl<T: Transport> Drop for ReadySubscription<T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.activation.release() {
            self.activation.stop_in_background();
        }
    }
}

impl<T: Transport> fmt::Debug for ReadySubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySubscription")
            .field("ready", &self.is_ready())
            .field("released", &self.released)
            .finish()
    }
}
