//! Engine facade.
//!
//! [`ResilienceEngine`] owns one registry per resilience pattern plus the
//! shared event bus, and composes them for a single call site: bulkhead
//! admission, then circuit breaker, then timeout, with retry wrapped
//! around the whole chain and an optional fallback when everything fails.
//!
//! Engines are constructed explicitly and passed where they are needed;
//! there is no process-wide instance.
//!
//! ## Example
//!
//! ```rust,ignore
//! use breakwater_core::engine::{ExecutionPolicy, ResilienceEngine};
//! use breakwater_core::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let engine = ResilienceEngine::new();
//! let policy = ExecutionPolicy::named("llm")
//!     .timeout(Duration::from_secs(30))
//!     .retry(RetryPolicy::new(3));
//!
//! let answer = engine.execute(&policy, || async {
//!     llm.complete(&prompt).await
//! }).await?;
//! ```

use crate::bulkhead::{BulkheadError, BulkheadRegistry, BulkheadStats};
use crate::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry, CircuitBreakerStats};
use crate::fallback::{FallbackError, FallbackRegistry, FallbackStats};
use crate::retry::{RetryError, RetryPolicy};
use crate::timeout::{TimeoutError, with_timeout_observed};
use breakwater_events::EventBus;
use breakwater_queue::{
    DeadLetterRegistry, DeadLetterStats, DecouplingRegistry, DecouplingStats, QueueError,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Which patterns apply to one call site.
///
/// Every field is optional; an empty policy runs the operation directly.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPolicy {
    /// Bulkhead partition to admit through.
    pub bulkhead: Option<String>,
    /// Circuit breaker guarding the dependency.
    pub circuit: Option<String>,
    /// Deadline for each attempt.
    pub timeout: Option<Duration>,
    /// Retry schedule wrapped around the whole chain.
    pub retry: Option<RetryPolicy>,
    /// Fallback handler to run when all attempts fail.
    pub fallback: Option<String>,
}

impl ExecutionPolicy {
    /// A policy using the same name for bulkhead and circuit breaker.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bulkhead: Some(name.clone()),
            circuit: Some(name),
            ..Default::default()
        }
    }

    pub fn bulkhead(mut self, name: impl Into<String>) -> Self {
        self.bulkhead = Some(name.into());
        self
    }

    pub fn circuit(mut self, name: impl Into<String>) -> Self {
        self.circuit = Some(name.into());
        self
    }

    pub fn timeout(mut self, deadline: Duration) -> Self {
        self.timeout = Some(deadline);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    fn label(&self) -> &str {
        self.circuit
            .as_deref()
            .or(self.bulkhead.as_deref())
            .unwrap_or("operation")
    }
}

/// Unified error for engine-composed execution.
#[derive(Debug)]
pub enum EngineError<E> {
    /// The bulkhead partition and its wait queue were full.
    CapacityExceeded,
    /// The circuit breaker refused the call.
    CircuitOpen,
    /// A deadline elapsed.
    Timeout(Duration),
    /// Every retry attempt failed; the final attempt's error is inside.
    RetriesExhausted {
        attempts: u32,
        last_error: Box<EngineError<E>>,
    },
    /// The fallback handler failed too.
    Fallback(FallbackError),
    /// A queue operation failed.
    Queue(QueueError),
    /// The operation itself failed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for EngineError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "bulkhead capacity exceeded"),
            Self::CircuitOpen => write!(f, "circuit breaker is open"),
            Self::Timeout(d) => write!(f, "operation timed out after {:?}", d),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "failed after {} attempts: {}", attempts, last_error),
            Self::Fallback(e) => write!(f, "{}", e),
            Self::Queue(e) => write!(f, "{}", e),
            Self::Execution(e) => write!(f, "execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for EngineError<E> {}

impl<E> From<QueueError> for EngineError<E> {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

/// Aggregate counters across every pattern.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub bulkhead_rejections: u64,
    pub circuit_breaker_trips: u64,
    pub retry_attempts: u64,
    pub fallback_executions: u64,
    pub dead_letter_messages: u64,
    /// Elapsed deadlines from every stage: the policy timeout plus the
    /// bulkheads' and circuit breakers' per-call timeouts.
    pub timeouts: u64,
    pub successful_recoveries: u64,
}

/// Full engine snapshot, one section per registry.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub bulkheads: Vec<BulkheadStats>,
    pub circuits: Vec<CircuitBreakerStats>,
    pub fallbacks: FallbackStats,
    pub dead_letters: Vec<DeadLetterStats>,
    pub queues: Vec<DecouplingStats>,
    pub metrics: EngineMetrics,
}

/// The resilience engine: every pattern registry behind one handle.
pub struct ResilienceEngine {
    events: EventBus,
    bulkheads: BulkheadRegistry,
    circuits: CircuitBreakerRegistry,
    fallbacks: FallbackRegistry,
    dead_letters: Arc<DeadLetterRegistry>,
    decoupling: Arc<DecouplingRegistry>,
    retry_attempts: AtomicU64,
    timeouts: AtomicU64,
}

impl Default for ResilienceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceEngine {
    /// Create an engine with its own event bus.
    pub fn new() -> Self {
        Self::with_bus(EventBus::new())
    }

    /// Create an engine publishing to an existing bus.
    pub fn with_bus(events: EventBus) -> Self {
        let bus = Some(events.clone());
        Self {
            bulkheads: BulkheadRegistry::new(bus.clone()),
            circuits: CircuitBreakerRegistry::new(bus.clone()),
            fallbacks: FallbackRegistry::new(bus.clone()),
            dead_letters: Arc::new(DeadLetterRegistry::new(bus.clone())),
            decoupling: Arc::new(DecouplingRegistry::new(bus)),
            events,
            retry_attempts: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// The shared event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Bulkhead registry.
    pub fn bulkheads(&self) -> &BulkheadRegistry {
        &self.bulkheads
    }

    /// Circuit breaker registry.
    pub fn circuits(&self) -> &CircuitBreakerRegistry {
        &self.circuits
    }

    /// Fallback registry.
    pub fn fallbacks(&self) -> &FallbackRegistry {
        &self.fallbacks
    }

    /// Dead letter queue registry.
    pub fn dead_letters(&self) -> &Arc<DeadLetterRegistry> {
        &self.dead_letters
    }

    /// Decoupling queue registry.
    pub fn decoupling(&self) -> &Arc<DecouplingRegistry> {
        &self.decoupling
    }

    /// Execute an operation under a policy.
    ///
    /// Per attempt the chain is bulkhead, then circuit breaker, then
    /// timeout; the retry schedule (if any) wraps the whole chain, so a
    /// rejected or timed-out attempt is retried like any other failure.
    pub async fn execute<F, Fut, T, E>(
        &self,
        policy: &ExecutionPolicy,
        f: F,
    ) -> Result<T, EngineError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match &policy.retry {
            None => self.attempt(policy, &f).await,
            Some(retry) => {
                let calls = AtomicU64::new(0);
                let result: Result<T, RetryError<EngineError<E>>> = retry
                    .execute_observed(&self.events, || {
                        calls.fetch_add(1, Ordering::Relaxed);
                        self.attempt(policy, &f)
                    })
                    .await;

                let calls = calls.load(Ordering::Relaxed);
                self.retry_attempts
                    .fetch_add(calls.saturating_sub(1), Ordering::Relaxed);

                result.map_err(|e| EngineError::RetriesExhausted {
                    attempts: e.attempts,
                    last_error: Box::new(e.last_error),
                })
            }
        }
    }

    /// Execute a JSON-producing operation, degrading to the policy's
    /// fallback handler when every attempt fails.
    ///
    /// Any terminal error, including a circuit rejection that never
    /// invoked the operation, routes through the fallback.
    pub async fn execute_with_fallback<F, Fut, E>(
        &self,
        policy: &ExecutionPolicy,
        f: F,
    ) -> Result<Value, EngineError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        match self.execute(policy, f).await {
            Ok(value) => Ok(value),
            Err(error) => match &policy.fallback {
                Some(name) => self
                    .fallbacks
                    .execute(name, error.to_string())
                    .await
                    .map_err(EngineError::Fallback),
                None => Err(error),
            },
        }
    }

    /// One pass through bulkhead, circuit breaker and timeout.
    async fn attempt<F, Fut, T, E>(
        &self,
        policy: &ExecutionPolicy,
        f: &F,
    ) -> Result<T, EngineError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let inner = || async {
            match policy.timeout {
                Some(deadline) => {
                    let result = with_timeout_observed(
                        policy.label(),
                        deadline,
                        Some(&self.events),
                        f(),
                    )
                    .await;
                    match result {
                        Ok(value) => Ok(value),
                        Err(TimeoutError::Elapsed(d)) => {
                            self.timeouts.fetch_add(1, Ordering::Relaxed);
                            Err(EngineError::Timeout(d))
                        }
                        Err(TimeoutError::Execution(e)) => Err(EngineError::Execution(e)),
                    }
                }
                None => f().await.map_err(EngineError::Execution),
            }
        };

        let guarded = || async {
            match &policy.circuit {
                Some(name) => {
                    let result = self.circuits.call(name, inner).await;
                    match result {
                        Ok(value) => Ok(value),
                        Err(CircuitBreakerError::Open) => Err(EngineError::CircuitOpen),
                        Err(CircuitBreakerError::Timeout(d)) => {
                            self.timeouts.fetch_add(1, Ordering::Relaxed);
                            Err(EngineError::Timeout(d))
                        }
                        Err(CircuitBreakerError::Execution(e)) => Err(e),
                    }
                }
                None => inner().await,
            }
        };

        match &policy.bulkhead {
            Some(name) => {
                let result = self.bulkheads.execute(name, guarded).await;
                match result {
                    Ok(value) => Ok(value),
                    Err(BulkheadError::CapacityExceeded) => Err(EngineError::CapacityExceeded),
                    Err(BulkheadError::Timeout(d)) => {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        Err(EngineError::Timeout(d))
                    }
                    Err(BulkheadError::Execution(e)) => Err(e),
                }
            }
            None => guarded().await,
        }
    }

    /// Aggregate counters across every registry.
    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            bulkhead_rejections: self.bulkheads.total_rejections(),
            circuit_breaker_trips: self.circuits.total_trips(),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            fallback_executions: self.fallbacks.stats().executions,
            dead_letter_messages: self
                .dead_letters
                .stats_all()
                .iter()
                .map(|s| s.total)
                .sum(),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            successful_recoveries: self.circuits.total_recoveries(),
        }
    }

    /// Full snapshot of every registry plus the aggregate metrics.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            bulkheads: self.bulkheads.stats_all(),
            circuits: self.circuits.stats_all(),
            fallbacks: self.fallbacks.stats(),
            dead_letters: self.dead_letters.stats_all(),
            queues: self.decoupling.stats_all(),
            metrics: self.metrics(),
        }
    }
}
