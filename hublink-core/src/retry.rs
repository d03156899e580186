// Retry policy with exponential backoff and jitter
// Used by the WebSocket transport while reconnecting

use crate::error::HubError;
use crate::transport::TransportConfig;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Reconnect policy described by a transport configuration
    pub fn from_transport(config: &TransportConfig) -> Self {
        Self::new(
            config.max_reconnect_attempts,
            config.reconnect_delay,
            config.max_reconnect_delay,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget runs out. The delay precedes every attempt after
    /// the first.
    pub async fn execute_async<F, T, Fut>(&self, mut operation: F) -> Result<T, HubError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, HubError>>,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, ?delay, error = %err, "Retrying after failure");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff for the given 1-based attempt, with 0-25% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        let jitter_range = (capped.as_millis() / 4) as u64;
        let jitter = rand::thread_rng().gen_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self.initial_delay.saturating_mul(2u32.pow(exponent));
        exponential.min(self.max_delay)
    }
}
