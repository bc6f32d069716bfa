//! Timeout enforcement.
//!
//! Races an operation against a deadline. If the deadline elapses first
//! the result is discarded and [`TimeoutError::Elapsed`] is returned; the
//! operation's own future is dropped, cancelling it at its next await
//! point.

use breakwater_events::{EventBus, ResilienceEvent};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout error.
#[derive(Debug)]
pub enum TimeoutError<E> {
    /// The deadline elapsed before the operation settled.
    Elapsed(Duration),
    /// The operation settled in time, with an error.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elapsed(d) => write!(f, "operation timed out after {:?}", d),
            Self::Execution(e) => write!(f, "execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for TimeoutError<E> {}

/// Run an operation under a deadline.
pub async fn with_timeout<Fut, T, E>(deadline: Duration, fut: Fut) -> Result<T, TimeoutError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Execution(e)),
        Err(_) => Err(TimeoutError::Elapsed(deadline)),
    }
}

/// Run a named operation under a deadline, publishing `timeout:exceeded`
/// when the deadline wins.
pub async fn with_timeout_observed<Fut, T, E>(
    name: &str,
    deadline: Duration,
    events: Option<&EventBus>,
    fut: Fut,
) -> Result<T, TimeoutError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    let result = with_timeout(deadline, fut).await;
    if let Err(TimeoutError::Elapsed(d)) = &result {
        warn!(name, deadline_ms = d.as_millis() as u64, "operation timed out");
        if let Some(bus) = events {
            bus.emit(ResilienceEvent::TimeoutExceeded {
                name: name.to_string(),
                elapsed_ms: d.as_millis() as u64,
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_operation_passes_through() {
        let result: Result<i32, TimeoutError<&str>> =
            with_timeout(Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_operation_is_cut_off() {
        let result: Result<(), TimeoutError<&str>> =
            with_timeout(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(TimeoutError::Elapsed(d)) => assert_eq!(d, Duration::from_millis(10)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execution_errors_are_preserved() {
        let result: Result<(), TimeoutError<&str>> =
            with_timeout(Duration::from_secs(1), async { Err("broken") }).await;
        assert!(matches!(result, Err(TimeoutError::Execution("broken"))));
    }

    #[tokio::test]
    async fn late_result_is_discarded() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let result: Result<(), TimeoutError<&str>> =
            with_timeout(Duration::from_millis(10), async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(TimeoutError::Elapsed(_))));
        tokio::time::sleep(Duration::from_millis(150)).await;
        // The future was dropped at the deadline, not left running.
        assert!(!finished.load(Ordering::SeqCst));
    }
}
