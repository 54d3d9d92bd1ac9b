use std::future::Future;
use tokio::time::{Duration, sleep};
use tracing::debug;

/// How a failed attempt should be treated by [`RetryPolicy::run`].
#[derive(Debug)]
pub enum Attempt<E> {
    Transient(E),
    Permanent(E),
}

/// Exhausted or permanently failed operation, carrying the last error as-is.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the 1-based `attempt`: nothing before the first one,
    /// then `base`, `2 * base`, `4 * base`, ...
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                debug!(target = "labelhub.retry", label, attempt, max_attempts, delay_ms = delay.as_millis() as u64, "retry_backoff");
                sleep(delay).await;
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Permanent(error)) => {
                    return Err(RetryFailure { attempts: attempt, error });
                }
                Err(Attempt::Transient(error)) => {
                    if attempt >= max_attempts {
                        return Err(RetryFailure { attempts: attempt, error });
                    }
                    debug!(target = "labelhub.retry", label, attempt, error = %error, "attempt_failed");
                    attempt += 1;
                }
            }
        }
    }
}
