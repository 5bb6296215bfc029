//! Per-call timeouts and exponential backoff for chain calls.

use crate::error::{WalletError, WalletResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout and backoff for calls to external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(15), max_retries: 3, backoff: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// Bound one attempt by the timeout.
    pub async fn once<T, Fut>(&self, fut: Fut) -> WalletResult<T>
    where
        Fut: Future<Output = WalletResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned as is.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> WalletResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WalletResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.once(op()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff.saturating_mul(1u32 << attempt.min(16));
                    warn!(op = what, attempt = attempt + 1, error = %e, delay_ms = delay.as_millis() as u64, "Retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
