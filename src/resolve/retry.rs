use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// How an operation run under a [`RetryPolicy`] ultimately failed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not worth retrying.
    Permanent(E),
    /// Every allowed attempt failed transiently; `last` is the final error.
    Exhausted { attempts: u32, last: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Permanent(e) => write!(f, "{e}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
        }
    }
}

/// Bounded retry with exponential backoff and jitter.
///
/// The backoff after failed attempt `n` (1-based) is `base * 2^(n-1)`, capped
/// at `max_delay`. The actual delay is drawn uniformly from the upper half of
/// that backoff, so it never exceeds `max_delay` and stays randomized even
/// once the cap is reached. A policy carries no state between runs, so
/// one policy can be shared by any number of concurrent operations, each with
/// its own attempt budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; values below 1 are raised to 1.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// `op` receives the 1-based attempt number. Only errors for which
    /// `is_transient` returns true are retried.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_transient: P) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let half = backoff / 2;
        let spread = (backoff - half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };

        half + Duration::from_millis(jitter)
    }
}
