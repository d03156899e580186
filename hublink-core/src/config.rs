// Connection configuration: hub address, identity credential and transport options

use crate::error::{HubError, HubResult};
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// Header carrying the identity credential on the opening handshake
pub const IDENTITY_HEADER: &str = "X-Hub-Identity";

/// Everything needed to open one hub connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket endpoint of the hub (`ws://` or `wss://`)
    pub address: String,
    /// Identity credential, sent once when the connection opens
    pub identity: String,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl ConnectionConfig {
    /// Create configuration builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Shorthand for an address and identity with default transport options
    pub fn new(address: impl Into<String>, identity: impl Into<String>) -> HubResult<Self> {
        Self::builder().address(address).identity(identity).build()
    }

    /// Check a deserialized configuration and normalize its address
    pub fn validate(mut self) -> HubResult<Self> {
        self.address = normalize_address(&self.address)?;

        if self.identity.trim().is_empty() {
            return Err(HubError::invalid_config("identity must not be empty"));
        }
        if HeaderValue::from_str(&self.identity).is_err() {
            return Err(HubError::invalid_config(
                "identity contains characters not allowed in a header value",
            ));
        }

        if self.transport.keepalive_interval.is_zero() || self.transport.connection_timeout.is_zero() {
            return Err(HubError::invalid_config(
                "keepalive_interval and connection_timeout must be non-zero",
            ));
        }

        Ok(self)
    }
}

fn normalize_address(address: &str) -> HubResult<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(HubError::invalid_config("address must not be empty"));
    }

    if address.starts_with("ws://") || address.starts_with("wss://") {
        Ok(address.to_string())
    } else if let Some(rest) = address.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = address.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        Err(HubError::invalid_config(format!(
            "unsupported address scheme: {}",
            address
        )))
    }
}

/// Connection configuration builder
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    address: Option<String>,
    identity: Option<String>,
    transport: Option<TransportConfig>,
}

impl ConnectionConfigBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> HubResult<ConnectionConfig> {
        let address = self
            .address
            .ok_or_else(|| HubError::invalid_config("address is required"))?;
        let identity = self
            .identity
            .ok_or_else(|| HubError::invalid_config("identity is required"))?;

        ConnectionConfig {
            address,
            identity,
            transport: self.transport.unwrap_or_default(),
        }
        .validate()
    }
}
