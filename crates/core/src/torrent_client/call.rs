//! Timeout and retry policy for backend calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::RemoteClientError;
use crate::config::RemoteCallConfig;
use crate::metrics::{BACKEND_CALLS, BACKEND_RETRIES};

/// Bounds applied to every call made through a [`super::RemoteSession`].
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from(&RemoteCallConfig::default())
    }
}

impl From<&RemoteCallConfig> for CallPolicy {
    fn from(config: &RemoteCallConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl CallPolicy {
    /// Single attempt, no waiting between retries. Useful in tests.
    pub fn immediate(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `fut` with a deadline. Elapsing is reported as a retryable timeout.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, RemoteClientError>
where
    F: Future<Output = Result<T, RemoteClientError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteClientError::Timeout(timeout)),
    }
}

/// Run `op` under the policy's timeout, retrying retryable failures with
/// exponential backoff. Rejections are returned immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &CallPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, RemoteClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteClientError>>,
{
    let mut attempt = 1;
    loop {
        match bounded(policy.timeout, op()).await {
            Ok(value) => {
                BACKEND_CALLS.with_label_values(&[operation, "ok"]).inc();
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                BACKEND_RETRIES.with_label_values(&[operation]).inc();
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Backend call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                BACKEND_CALLS.with_label_values(&[operation, e.kind()]).inc();
                if e.is_retryable() {
                    warn!(operation, attempts = attempt, error = %e, "Backend call gave up");
                }
                return Err(e);
            }
        }
    }
}
