use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Bounded exponential backoff: attempt `n` (0-based) waits
/// `base_delay * 2^n` before the next try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Transport policy for idempotent GETs: two retries, 0.5s base.
    pub const fn transport() -> Self {
        Self::new(3, Duration::from_millis(500))
    }

    /// Model-call policy: three attempts, waits of 1s, 2s.
    pub const fn model() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }
}

/// Run `op` until it succeeds, the policy is exhausted, or `retry_if`
/// rejects the error. Returns the last error on exhaustion.
pub async fn with_retry<T, E, F, Fut, P>(policy: RetryPolicy, retry_if: P, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt + 1 >= attempts || !retry_if(&e) {
                    return Err(e);
                }
                let backoff = policy.delay_for(attempt);
                debug!(attempt = attempt + 1, of = attempts, ?backoff, error = %e, "retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
