// ABOUTME: Page-level exponential backoff with jitter
// ABOUTME: Wraps any fallible async operation; independent of how fetches are scheduled

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff settings for one page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Jitter multipliers are drawn from this range. A lower bound of 1.0 keeps
/// successive delays non-decreasing, since the base delay doubles.
const JITTER: std::ops::Range<f64> = 1.0..1.5;

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based), before jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry` with the given jitter factor, capped.
    pub fn delay(&self, retry: u32, jitter: f64) -> Duration {
        self.base_delay(retry)
            .mul_f64(jitter.max(0.0))
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy's attempts are used up. Returns the last error.
pub async fn with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retry + 1 < attempts && should_retry(&e) => {
                let jitter = rand::thread_rng().gen_range(JITTER);
                let delay = policy.delay(retry, jitter);
                tracing::warn!(
                    "{} (attempt {}/{}), backing off for {:?}",
                    e,
                    retry + 1,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
