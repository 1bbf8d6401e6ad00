//! Retry with doubling backoff.

use std::{fmt::Display, future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

/// Retry budget for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: usize,
    /// Wait before the first retry; doubles before each subsequent one
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: usize, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    fn backoff_builder(&self) -> ExponentialBuilder {
        // Cap at the last delay this budget can produce so doubling is never clipped
        let doublings = u32::try_from(self.retries).unwrap_or(u32::MAX).min(20);
        let max_delay = self.backoff.saturating_mul(1u32 << doublings);

        ExponentialBuilder::default()
            .with_min_delay(self.backoff)
            .with_max_delay(max_delay)
            .with_factor(2.0)
            .with_max_times(self.retries)
    }
}

/// Run `operation`, retrying failures until the policy is spent.
///
/// With `retries = 3` and `backoff = 1s` the waits are 1s, 2s and 4s, so the
/// operation runs at most four times; the last error is returned.
pub async fn retry<T, E, F, Fut>(label: &str, policy: RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    operation
        .retry(policy.backoff_builder())
        .notify(|e: &E, dur: Duration| {
            warn!(
                operation = label,
                "{} failed, retrying after {:.2}s: {}",
                label,
                dur.as_secs_f64(),
                e
            )
        })
        .await
}
