//! Bounded retry with exponential backoff

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::ExpandError;

/// Maximum attempts per lookup
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubles after each
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy without sleeps, for tests and latency-sensitive callers
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 never waits)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, name: &str, url: &str, mut op: F) -> Result<T, ExpandError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExpandError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                attempt += 1;
                let backoff = policy.backoff(attempt);
                debug!(%name, %url, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "retry: transient error");
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}
