// Transport configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebSocket transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound on the opening handshake
    pub connection_timeout: Duration,
    /// Reconnect after an unexpected loss of the socket
    pub enable_auto_reconnect: bool,
    /// First reconnect delay, doubled per attempt
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Silence on the socket longer than this is reported as slow
    pub slow_threshold: Duration,
    /// Keepalive interval
    pub keepalive_interval: Duration,
    /// Maximum frame size
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            enable_auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            slow_threshold: Duration::from_secs(20),
            keepalive_interval: Duration::from_secs(15),
            max_frame_size: 1024 * 1024, // 1MB
        }
    }
}

impl TransportConfig {
    /// Create configuration builder
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }
}

/// Transport configuration builder
#[derive(Default)]
pub struct TransportConfigBuilder {
    connection_timeout: Option<Duration>,
    enable_auto_reconnect: Option<bool>,
    reconnect_delay: Option<Duration>,
    max_reconnect_delay: Option<Duration>,
    max_reconnect_attempts: Option<u32>,
    slow_threshold: Option<Duration>,
    keepalive_interval: Option<Duration>,
    max_frame_size: Option<usize>,
}

impl TransportConfigBuilder {
    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Enable auto-reconnect
    pub fn enable_auto_reconnect(mut self, enable: bool) -> Self {
        self.enable_auto_reconnect = Some(enable);
        self
    }

    /// Set reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = Some(delay);
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Set the silence threshold after which the link counts as slow
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }

    /// Set keepalive interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Build configuration
    pub fn build(self) -> TransportConfig {
        let default = TransportConfig::default();

        TransportConfig {
            connection_timeout: self.connection_timeout.unwrap_or(default.connection_timeout),
            enable_auto_reconnect: self.enable_auto_reconnect.unwrap_or(default.enable_auto_reconnect),
            reconnect_delay: self.reconnect_delay.unwrap_or(default.reconnect_delay),
            max_reconnect_delay: self.max_reconnect_delay.unwrap_or(default.max_reconnect_delay),
            max_reconnect_attempts: self.max_reconnect_attempts.unwrap_or(default.max_reconnect_attempts),
            slow_threshold: self.slow_threshold.unwrap_or(default.slow_threshold),
            keepalive_interval: self.keepalive_interval.unwrap_or(default.keepalive_interval),
            max_frame_size: self.max_frame_size.unwrap_or(default.max_frame_size),
        }
    }
}
