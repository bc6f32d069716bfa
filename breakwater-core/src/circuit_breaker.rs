//! Circuit breaker.
//!
//! The breaker watches a dependency for consecutive failures and opens the
//! circuit once a threshold is reached, rejecting calls until a cooldown
//! elapses. The first call after the cooldown runs as a single half-open
//! probe: success closes the circuit, failure re-opens it.
//!
//! ## States
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: calls are rejected without invoking the operation
//! - **Half-Open**: one probe call is testing recovery
//!
//! ## Example
//!
//! ```rust,ignore
//! use breakwater_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("payments")
//!         .failure_threshold(5)
//!         .reset_timeout(Duration::from_secs(30)),
//! );
//!
//! let result = circuit.call(|| async {
//!     payments.charge().await
//! }).await;
//! ```

use breakwater_events::{EventBus, ResilienceEvent};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Tripped; calls are rejected.
    Open,
    /// A single probe is testing recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Breaker name (for lookup, logging and metrics).
    pub name: String,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Per-call execution deadline.
    pub call_timeout: Duration,
    /// Cooldown before a half-open probe is allowed.
    pub reset_timeout: Duration,
    /// Failures older than this no longer count toward the threshold.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            call_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the consecutive-failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the per-call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the cooldown before probing.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the failure-counting window.
    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period = period;
        self
    }
}

/// Circuit breaker error.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not invoked.
    Open,
    /// The operation ran but exceeded the call timeout.
    Timeout(Duration),
    /// The operation ran and failed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "circuit breaker is open"),
            Self::Timeout(d) => write!(f, "call timed out after {:?}", d),
            Self::Execution(e) => write!(f, "execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}

struct BreakerState {
    state: CircuitState,
    failure_times: Vec<Instant>,
    next_attempt: Option<Instant>,
    probe_in_flight: bool,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

/// Stateful guard for one protected dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
    total_requests: AtomicU64,
    trips: AtomicU64,
    recoveries: AtomicU64,
    rejections: AtomicU64,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Self::with_events(config, None)
    }

    /// Create a circuit breaker wired to an event bus.
    pub fn with_events(config: CircuitBreakerConfig, events: Option<EventBus>) -> Arc<Self> {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            reset_timeout = ?config.reset_timeout,
            "circuit breaker initialized"
        );

        Arc::new(Self {
            config,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_times: Vec::new(),
                next_attempt: None,
                probe_in_flight: false,
                last_failure: None,
                last_success: None,
            }),
            total_requests: AtomicU64::new(0),
            trips: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            events,
        })
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Consecutive failures inside the monitoring window.
    pub fn failure_count(&self) -> u32 {
        let now = Instant::now();
        let window = self.config.monitoring_period;
        self.inner
            .read()
            .failure_times
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count() as u32
    }

    /// Execute with circuit breaker protection.
    ///
    /// Admitted calls run under the configured call timeout; a timeout
    /// counts as a failure. While open, calls fail with
    /// [`CircuitBreakerError::Open`] without invoking the operation; once
    /// the cooldown elapses the next call runs as the single recovery probe.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if !self.admit() {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.config.name, "circuit breaker rejected call");
            self.emit(ResilienceEvent::CircuitRejected {
                circuit: self.config.name.clone(),
            });
            return Err(CircuitBreakerError::Open);
        }

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(&e.to_string());
                Err(CircuitBreakerError::Execution(e))
            }
            Err(_) => {
                let d = self.config.call_timeout;
                self.record_failure(&format!("timed out after {:?}", d));
                Err(CircuitBreakerError::Timeout(d))
            }
        }
    }

    /// Whether a call may proceed, applying the open -> half-open
    /// transition when the cooldown has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = inner
                    .next_attempt
                    .map(|at| Instant::now() >= at)
                    .unwrap_or(true);
                if ready {
                    debug!(name = %self.config.name, "circuit breaker half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // One probe at a time.
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.last_success = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_times.clear();
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_times.clear();
                inner.next_attempt = None;
                inner.probe_in_flight = false;
                self.recoveries.fetch_add(1, Ordering::Relaxed);
                info!(name = %self.config.name, "circuit breaker closed after recovery");
                self.emit(ResilienceEvent::CircuitClosed {
                    circuit: self.config.name.clone(),
                });
            }
            CircuitState::Open => {
                // Late result from before the trip.
                debug!(name = %self.config.name, "success recorded while circuit open");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, error: &str) {
        let now = Instant::now();
        let mut inner = self.inner.write();
        inner.last_failure = Some(now);

        self.emit(ResilienceEvent::CircuitFailure {
            circuit: self.config.name.clone(),
            error: error.to_string(),
        });

        match inner.state {
            CircuitState::Closed => {
                let window_start = now - self.config.monitoring_period;
                inner.failure_times.retain(|t| *t > window_start);
                inner.failure_times.push(now);

                if inner.failure_times.len() as u32 >= self.config.failure_threshold {
                    self.trip(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                self.trip(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerState, now: Instant) {
        warn!(
            name = %self.config.name,
            failures = inner.failure_times.len(),
            "circuit breaker opened"
        );
        inner.state = CircuitState::Open;
        inner.next_attempt = Some(now + self.config.reset_timeout);
        self.trips.fetch_add(1, Ordering::Relaxed);
        self.emit(ResilienceEvent::CircuitOpen {
            circuit: self.config.name.clone(),
        });
    }

    /// Manually reset the breaker to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Closed;
        inner.failure_times.clear();
        inner.next_attempt = None;
        inner.probe_in_flight = false;
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write();
        if inner.state != CircuitState::Open {
            self.trip(&mut inner, now);
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read();
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: inner.state,
            failures: inner.failure_times.len() as u32,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            trips: self.trips.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            last_failure_age_ms: inner.last_failure.map(|t| t.elapsed().as_millis() as u64),
            last_success_age_ms: inner.last_success.map(|t| t.elapsed().as_millis() as u64),
        }
    }

    fn emit(&self, event: ResilienceEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub total_requests: u64,
    pub trips: u64,
    pub recoveries: u64,
    pub rejections: u64,
    pub last_failure_age_ms: Option<u64>,
    pub last_success_age_ms: Option<u64>,
}

/// Named circuit breaker registry.
pub struct CircuitBreakerRegistry {
    entries: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    events: Option<EventBus>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new(events: Option<EventBus>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_config: CircuitBreakerConfig::default(),
            events,
        }
    }

    /// Register a breaker with explicit configuration.
    pub fn register(&self, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = CircuitBreaker::with_events(config.clone(), self.events.clone());
        self.entries.write().insert(config.name, breaker.clone());
        breaker
    }

    /// Look up a breaker by name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.entries.read().get(name).cloned()
    }

    /// Look up a breaker, creating it with defaults if missing.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut config = self.default_config.clone();
        config.name = name.to_string();
        let breaker = CircuitBreaker::with_events(config, self.events.clone());

        let mut entries = self.entries.write();
        entries.entry(name.to_string()).or_insert(breaker).clone()
    }

    /// Execute through the named breaker.
    pub async fn call<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.get_or_create(name).call(f).await
    }

    /// Statistics for every registered breaker.
    pub fn stats_all(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> =
            self.entries.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Total trips across all breakers.
    pub fn total_trips(&self) -> u64 {
        self.entries
            .read()
            .values()
            .map(|b| b.trips.load(Ordering::Relaxed))
            .sum()
    }

    /// Total half-open recoveries across all breakers.
    pub fn total_recoveries(&self) -> u64 {
        self.entries
            .read()
            .values()
            .map(|b| b.recoveries.load(Ordering::Relaxed))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("test")
            .failure_threshold(threshold)
            .reset_timeout(reset)
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(config(3, Duration::from_secs(30)));
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..3 {
            let _: Result<(), CircuitBreakerError<&str>> =
                cb.call(|| async { Err("error") }).await;
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().trips, 1);
    }

    #[tokio::test]
    async fn rejects_without_invoking_while_open() {
        let cb = CircuitBreaker::new(config(1, Duration::from_secs(30)));

        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("error") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result: Result<(), CircuitBreakerError<&str>> = cb
            .call(|| {
                invoked.store(true, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert!(!invoked.load(Ordering::SeqCst));
        assert_eq!(cb.stats().rejections, 1);
    }

    #[tokio::test]
    async fn probe_success_closes_and_resets_failures() {
        let cb = CircuitBreaker::new(config(1, Duration::from_millis(20)));

        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("error") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let result: Result<i32, CircuitBreakerError<&str>> = cb.call(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.stats().recoveries, 1);
    }

    #[tokio::test]
    async fn probe_failure_reopens_with_new_cooldown() {
        let cb = CircuitBreaker::new(config(1, Duration::from_millis(20)));

        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("first") }).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let _: Result<(), CircuitBreakerError<&str>> =
            cb.call(|| async { Err("still broken") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown restarted: the very next call is rejected again.
        let result: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn success_clears_consecutive_failures() {
        let cb = CircuitBreaker::new(config(3, Duration::from_secs(30)));

        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("e1") }).await;
        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("e2") }).await;
        assert_eq!(cb.failure_count(), 2);

        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert_eq!(cb.failure_count(), 0);

        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("e3") }).await;
        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("e4") }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn call_timeout_counts_as_failure() {
        let cb = CircuitBreaker::new(
            config(1, Duration::from_secs(30)).call_timeout(Duration::from_millis(10)),
        );

        let result: Result<(), CircuitBreakerError<&str>> = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Timeout(_))));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn stale_failures_fall_out_of_the_window() {
        let cb = CircuitBreaker::new(
            config(2, Duration::from_secs(30)).monitoring_period(Duration::from_millis(30)),
        );

        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("e1") }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // First failure has aged out; this one starts a new run.
        let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("e2") }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn manual_controls() {
        let cb = CircuitBreaker::new(config(5, Duration::from_secs(30)));

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn registry_tracks_independent_breakers() {
        let registry = CircuitBreakerRegistry::new(None);
        registry.register(config(1, Duration::from_secs(30)));

        let _: Result<(), CircuitBreakerError<&str>> =
            registry.call("test", || async { Err("down") }).await;
        assert_eq!(registry.get("test").unwrap().state(), CircuitState::Open);

        // Other dependencies are unaffected.
        let result: Result<i32, CircuitBreakerError<&str>> =
            registry.call("other", || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(registry.total_trips(), 1);
    }
}
