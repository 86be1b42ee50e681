//! Retry policy and the retrying wrapper around a single [`Fetcher`].

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::contract::{FetchError, FetchedAsset, Fetcher};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Exponential backoff with jitter.
///
/// Retry `n` (0-based) waits somewhere between half and all of
/// `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff ceiling for retry number `retry` before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay to sleep before retry number `retry`, honouring a server `Retry-After` hint.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let ceiling = self.backoff(retry);
        let half = ceiling / 2;
        let jitter_ms = ceiling.saturating_sub(half).as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        let delay = half + jitter;
        match retry_after {
            Some(hint) if hint > delay => hint.min(self.max_delay),
            _ => delay,
        }
    }
}

/// A fetch that eventually succeeded.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub asset: FetchedAsset,
    pub attempts: u32,
}

/// A fetch that gave up, with the last error seen.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub error: FetchError,
    pub attempts: u32,
}

/// Fetch `url`, retrying transient failures according to `policy`.
///
/// Both the attempts and the backoff sleeps race against `cancel`; a
/// cancellation ends the loop with [`FetchError::Cancelled`].
pub async fn fetch_with_retry<F>(
    fetcher: &F,
    url: &str,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
) -> Result<FetchOutcome, FetchFailure>
where
    F: Fetcher + ?Sized,
{
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchFailure {
                error: FetchError::Cancelled,
                attempts,
            });
        }
        attempts += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = fetcher.fetch(url) => result,
        };

        let error = match result {
            Ok(asset) => {
                debug!(url, attempts, bytes = asset.bytes.len(), "Fetch succeeded");
                return Ok(FetchOutcome { asset, attempts });
            }
            Err(error) => error,
        };

        let retries_used = attempts - 1;
        if !error.is_retryable() || retries_used >= policy.max_retries {
            if error.is_retryable() {
                warn!(url, attempts, error = %error, "Giving up after exhausting retries");
            }
            return Err(FetchFailure { error, attempts });
        }

        let delay = policy.delay_for(retries_used, error.retry_after());
        warn!(
            url,
            attempt = attempts,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Transient fetch failure, retrying"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(FetchFailure { error: FetchError::Cancelled, attempts });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
