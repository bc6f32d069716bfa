//! Resilience primitives for the Breakwater engine.
//!
//! Each pattern lives in its own module and works standalone; the
//! [`engine`] module composes them behind one handle:
//!
//! - [`bulkhead`] — concurrency isolation with a bounded wait queue
//! - [`circuit_breaker`] — trip on consecutive failures, probe to recover
//! - [`retry`] — exponential, linear or Fibonacci backoff with jitter
//! - [`timeout`] — deadline enforcement
//! - [`fallback`] — registered degraded-mode handlers
//! - [`engine`] — the composed facade plus aggregate metrics
//! - [`health`] — periodic saturation sampling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use breakwater_core::engine::{ExecutionPolicy, ResilienceEngine};
//! use breakwater_core::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let engine = ResilienceEngine::new();
//! let policy = ExecutionPolicy::named("search")
//!     .timeout(Duration::from_secs(5))
//!     .retry(RetryPolicy::new(3));
//!
//! let hits = engine.execute(&policy, || async {
//!     index.query(&terms).await
//! }).await?;
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod engine;
pub mod fallback;
pub mod health;
pub mod retry;
pub mod timeout;

pub use bulkhead::{
    Bulkhead, BulkheadConfig, BulkheadError, BulkheadRegistry, BulkheadStats, IsolationKind,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use engine::{EngineError, EngineMetrics, EngineStatus, ExecutionPolicy, ResilienceEngine};
pub use fallback::{FallbackChain, FallbackError, FallbackRegistry, FallbackStats};
pub use health::{
    ComponentHealth, HealthMonitor, HealthMonitorConfig, HealthMonitorError, HealthReport,
    HealthStatus,
};
pub use retry::{BackoffKind, RetryError, RetryPolicy};
pub use timeout::{TimeoutError, with_timeout, with_timeout_observed};
