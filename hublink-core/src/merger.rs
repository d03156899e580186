// Lifecycle event merger
// Folds the four transport notifications into the status channel, up to and including Closed

use crate::status::{ConnectionStatus, StatusChannel};
use crate::transport::{HandlerId, Transport, TransportEvent};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Status reported for a transport notification
pub fn status_for(event: TransportEvent) -> ConnectionStatus {
    match event {
        TransportEvent::Closed => ConnectionStatus::Closed,
        TransportEvent::Slow => ConnectionStatus::ConnectionSlow,
        TransportEvent::Reconnected => ConnectionStatus::Reconnected,
        TransportEvent::Reconnecting => ConnectionStatus::Reconnecting,
    }
}

struct MergerState {
    terminated: bool,
    registrations: Vec<(TransportEvent, HandlerId)>,
}

struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    status: Arc<StatusChannel>,
    state: Mutex<MergerState>,
}

impl<T: Transport> Dispatcher<T> {
    fn dispatch(&self, event: TransportEvent) {
        let status = status_for(event);

        let registrations = {
            let mut state = self.state.lock();
            if state.terminated {
                debug!(%event, "Ignoring transport event after close");
                return;
            }

            // Pushing under the merger lock keeps events in arrival order
            self.status.push(status);

            if !status.is_terminal() {
                return;
            }
            state.terminated = true;
            std::mem::take(&mut state.registrations)
        };

        info!("Transport closed, detaching lifecycle handlers");
        for (event, id) in registrations {
            self.transport.unsubscribe(event, id);
        }
    }

    fn detach_all(&self) {
        let registrations = {
            let mut state = self.state.lock();
            state.terminated = true;
            std::mem::take(&mut state.registrations)
        };
        for (event, id) in registrations {
            self.transport.unsubscribe(event, id);
        }
    }
}

/// Single dispatcher registered on all four transport event sources.
///
/// Handlers hold only a weak reference back to the dispatcher, so dropping the
/// merger (or observing `Closed`) deregisters everything without leaking.
pub struct LifecycleEventMerger<T: Transport> {
    dispatcher: Arc<Dispatcher<T>>,
}

impl<T: Transport> LifecycleEventMerger<T> {
    /// Register on every transport event source and feed `status`
    pub fn attach(transport: Arc<T>, status: Arc<StatusChannel>) -> Self {
        let dispatcher = Arc::new(Dispatcher {
            transport: Arc::clone(&transport),
            status,
            state: Mutex::new(MergerState {
                terminated: false,
                registrations: Vec::with_capacity(TransportEvent::ALL.len()),
            }),
        });

        // Hold the lock while registering so an early event cannot slip in
        // before every handler id is recorded
        {
            let mut state = dispatcher.state.lock();
            for event in TransportEvent::ALL {
                let weak: Weak<Dispatcher<T>> = Arc::downgrade(&dispatcher);
                let id = transport.subscribe(
                    event,
                    Arc::new(move || {
                        if let Some(dispatcher) = weak.upgrade() {
                            dispatcher.dispatch(event);
                        }
                    }),
                );
                state.registrations.push((event, id));
            }
        }

        debug!("Lifecycle handlers attached");
        Self { dispatcher }
    }

    /// Whether `Closed` has been observed (or the merger was detached)
    pub fn is_terminated(&self) -> bool {
        self.dispatcher.state.lock().terminated
    }

    /// Handlers still registered on the transport
    pub fn registered(&self) -> usize {
        self.dispatcher.state.lock().registrations.len()
    }
}

impl<T: Transport> Drop for LifecycleEventMerger<T> {
    fn drop(&mut self) {
        self.dispatcher.detach_all();
    }
}
