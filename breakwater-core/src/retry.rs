//! Retry with configurable backoff.
//!
//! A [`RetryPolicy`] runs an operation up to `max_attempts` times, sleeping
//! between attempts according to a backoff curve plus random jitter. The
//! delay before retry `n` (1-based) is:
//!
//! - **Exponential**: `min(base * 2^(n-1), max)`
//! - **Linear**: `min(base * n, max)`
//! - **Fibonacci**: `min(fib(n) * base, max)` with `fib(1) = fib(2) = 1`
//!
//! Jitter adds a uniform `[0, 1000ms)` to every delay so that callers
//! failing together do not retry together.

use breakwater_events::{EventBus, ResilienceEvent};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff curve selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Delay doubles each attempt.
    Exponential,
    /// Delay grows by the base each attempt.
    Linear,
    /// Delay follows the Fibonacci sequence scaled by the base.
    Fibonacci,
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay the backoff curve scales.
    pub base_delay: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_delay: Duration,
    /// Which curve to follow.
    pub backoff: BackoffKind,
    /// Whether to add random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff: BackoffKind::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt count.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay ceiling.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff curve.
    pub fn backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// The delay before retry `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.base_delay.as_millis() as u64;
        let raw_ms = match self.backoff {
            BackoffKind::Exponential => base_ms.saturating_mul(1u64 << (attempt - 1).min(62)),
            BackoffKind::Linear => base_ms.saturating_mul(attempt as u64),
            BackoffKind::Fibonacci => base_ms.saturating_mul(fibonacci(attempt)),
        };
        Duration::from_millis(raw_ms).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            delay + Duration::from_millis((rand_factor() * 1000.0) as u64)
        } else {
            delay
        }
    }

    /// Execute with retries.
    ///
    /// Runs the operation until it succeeds or `max_attempts` attempts have
    /// failed, sleeping the curve's delay between attempts. The final error
    /// is returned in [`RetryError`] along with the attempt count.
    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run(None, &mut f, |_: &E, _| true).await
    }

    /// Execute with retries, consulting a predicate before each retry.
    ///
    /// After a failed attempt the predicate sees the error and the 1-based
    /// attempt number; returning `false` stops retrying and propagates that
    /// error immediately. Lets callers separate permanent failures (bad
    /// request, auth) from transient ones.
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        mut f: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E, u32) -> bool,
    {
        self.run(None, &mut f, should_retry).await
    }

    /// Execute with retries, publishing attempt events to a bus.
    pub async fn execute_observed<F, Fut, T, E>(
        &self,
        events: &EventBus,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run(Some(events), &mut f, |_: &E, _| true).await
    }

    async fn run<F, Fut, T, E, P>(
        &self,
        events: Option<&EventBus>,
        f: &mut F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E, u32) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                        if let Some(bus) = events {
                            bus.emit(ResilienceEvent::RetrySuccess { attempt });
                        }
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt < attempts && !should_retry(&e, attempt) {
                        debug!(attempt, error = %e, "error classified non-retryable");
                        return Err(RetryError {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    if attempt < attempts {
                        let delay = self.jittered(self.delay_for(attempt));
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "attempt failed, backing off"
                        );
                        if let Some(bus) = events {
                            bus.emit(ResilienceEvent::RetryAttempt {
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                            });
                        }
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(attempts, error = %e, "all retry attempts exhausted");
                        if let Some(bus) = events {
                            bus.emit(ResilienceEvent::RetryExhausted {
                                attempts,
                                error: e.to_string(),
                            });
                        }
                        last_error = Some(e);
                    }
                }
            }
        }

        // attempts >= 1, so at least one error was recorded.
        match last_error {
            Some(e) => Err(RetryError {
                attempts,
                last_error: e,
            }),
            None => unreachable!("retry loop ran zero attempts"),
        }
    }
}

/// All attempts failed.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// The error from the final attempt.
    pub last_error: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// The `n`th Fibonacci number, 1-based, with `fib(1) = fib(2) = 1`.
fn fibonacci(n: u32) -> u64 {
    let mut a: u64 = 1;
    let mut b: u64 = 1;
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n <= 2 { 1 } else { b }
}

/// Pseudo-random factor in `[0, 1)` from the system clock.
fn rand_factor() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1_000_000) as f64 / 1_000_000.0
}
