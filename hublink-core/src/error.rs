// Error handling for hub connections
// Start failures propagate to the caller, stop failures are only ever logged

use std::sync::Arc;
use thiserror::Error;

/// Type alias for hub results
pub type HubResult<T> = Result<T, HubError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum HubError {
    /// `start()` was called a second time on the same connection
    #[error("Connection already initialized: start() may only be called once")]
    AlreadyInitialized,

    #[error("Transport start failed: {message}")]
    TransportStart {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Transport stop failed: {message}")]
    TransportStop {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Invalid proxy name: {message}")]
    InvalidProxyName {
        message: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
    },

    #[error("Not connected: {message}")]
    NotConnected {
        message: String,
    },

    #[error("Send failed: {message}")]
    Send {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Start cancelled before the transport became ready")]
    StartCancelled,

    #[error("Connection stopped: a stopped connection cannot be activated again")]
    ConnectionStopped,

    #[error("No Tokio runtime available: {message}")]
    NoRuntime {
        message: String,
    },

    /// A failure shared between every subscriber of one activation
    #[error(transparent)]
    Shared(Arc<HubError>),
}

impl HubError {
    /// Create a transport start error
    pub fn transport_start(message: impl Into<String>) -> Self {
        Self::TransportStart {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport start error with an underlying cause
    pub fn transport_start_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TransportStart {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport stop error
    pub fn transport_stop(message: impl Into<String>) -> Self {
        Self::TransportStop {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid proxy name error
    pub fn invalid_proxy_name(message: impl Into<String>) -> Self {
        Self::InvalidProxyName {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a not connected error
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::NotConnected {
            message: message.into(),
        }
    }

    /// Create a send error with an underlying cause
    pub fn send<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Send {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a missing runtime error
    pub fn no_runtime(message: impl Into<String>) -> Self {
        Self::NoRuntime {
            message: message.into(),
        }
    }

    /// Strip the shared wrapper, if any
    pub fn root(&self) -> &HubError {
        match self {
            HubError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            HubError::AlreadyInitialized
            | HubError::InvalidProxyName { .. }
            | HubError::ConnectionStopped
            | HubError::NoRuntime { .. } => ErrorCategory::Usage,
            HubError::InvalidConfig { .. } => ErrorCategory::Config,
            HubError::TransportStart { .. } | HubError::StartCancelled => ErrorCategory::Start,
            HubError::TransportStop { .. } => ErrorCategory::Stop,
            HubError::NotConnected { .. } | HubError::Send { .. } => ErrorCategory::Network,
            HubError::Serialization { .. } => ErrorCategory::Encoding,
            HubError::Shared(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a new Connection could reasonably succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            HubError::TransportStart { .. } | HubError::NotConnected { .. } | HubError::Send { .. }
        )
    }

    pub fn is_usage_error(&self) -> bool {
        self.category() == ErrorCategory::Usage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Usage,
    Config,
    Start,
    Stop,
    Network,
    Encoding,
    Unknown,
}
