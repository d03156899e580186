//! Hublink core library
//!
//! Lifecycle of a single connection to a real-time hub: a replayable status
//! signal, a shared ref-counted start operation and lazily created named
//! proxies over the underlying transport.

pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod merger;
pub mod proxy;
pub mod retry;
pub mod status;
pub mod transport;

pub use config::{ConnectionConfig, IDENTITY_HEADER};
pub use connection::{Connection, HubConnection};
pub use error::{HubError, HubResult};
pub use lifecycle::{ActivationState, ReadySignal, ReadySubscription};
pub use status::{ConnectionStatus, StatusSignal, StatusStream};
pub use transport::{Transport, TransportConfig, TransportEvent};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
