//! Bulkhead isolation.
//!
//! A bulkhead bounds how many operations of one kind run at the same time,
//! so a slow dependency cannot drain the whole process. Excess calls wait in
//! a bounded FIFO queue; once the queue is full, calls are rejected
//! immediately.
//!
//! ## Example
//!
//! ```rust,ignore
//! use breakwater_core::bulkhead::{Bulkhead, BulkheadConfig};
//!
//! let bulkhead = Bulkhead::new(BulkheadConfig::new("db", 10));
//!
//! let result = bulkhead.execute(|| async {
//!     run_query().await
//! }).await;
//! ```

use breakwater_events::{EventBus, ResilienceEvent};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// How the partition isolates its work.
///
/// All kinds share one execution path on the async runtime; the kind is kept
/// as configuration so callers can describe intent and operators can see it
/// in status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationKind {
    /// Counting-semaphore admission (default).
    #[default]
    Semaphore,
    /// Pool-style isolation for CPU-heavy work.
    ThreadPool,
    /// Queue-backed admission for bursty producers.
    Queued,
}

/// Bulkhead configuration.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Partition name (for lookup, logging and metrics).
    pub name: String,
    /// Isolation kind.
    pub isolation: IsolationKind,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Maximum operations waiting for a permit.
    pub max_queue_size: u32,
    /// Per-call execution deadline.
    pub timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            isolation: IsolationKind::default(),
            max_concurrent: 10,
            max_queue_size: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

impl BulkheadConfig {
    /// Create a new configuration.
    pub fn new(name: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            name: name.into(),
            max_concurrent,
            ..Default::default()
        }
    }

    /// Set the isolation kind.
    pub fn isolation(mut self, kind: IsolationKind) -> Self {
        self.isolation = kind;
        self
    }

    /// Set the wait-queue bound.
    pub fn max_queue_size(mut self, size: u32) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Bulkhead error.
#[derive(Debug)]
pub enum BulkheadError<E> {
    /// Both the running set and the wait queue are full.
    CapacityExceeded,
    /// The operation ran but exceeded the per-call timeout.
    Timeout(Duration),
    /// The operation ran and failed.
    Execution(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BulkheadError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "bulkhead capacity exceeded"),
            Self::Timeout(d) => write!(f, "bulkhead call timed out after {:?}", d),
            Self::Execution(e) => write!(f, "execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for BulkheadError<E> {}

/// A named concurrency partition.
pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    active: AtomicU32,
    waiting: AtomicU32,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    events: Option<EventBus>,
}

impl Bulkhead {
    /// Create a new bulkhead.
    pub fn new(config: BulkheadConfig) -> Arc<Self> {
        Self::with_events(config, None)
    }

    /// Create a bulkhead wired to an event bus.
    pub fn with_events(config: BulkheadConfig, events: Option<EventBus>) -> Arc<Self> {
        info!(
            name = %config.name,
            max_concurrent = config.max_concurrent,
            max_queue_size = config.max_queue_size,
            "bulkhead initialized"
        );

        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config,
            active: AtomicU32::new(0),
            waiting: AtomicU32::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            events,
        })
    }

    /// Partition name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Currently executing operations.
    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    /// Operations waiting for a permit.
    pub fn queue_depth(&self) -> u32 {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Whether a permit is immediately available.
    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    /// Execute under bulkhead protection.
    ///
    /// Runs immediately if a permit is free; otherwise waits in FIFO order
    /// while the queue bound allows, and fails with
    /// [`BulkheadError::CapacityExceeded`] once it does not. Admitted calls
    /// run under the configured per-call timeout.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let permit = match self.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                // Claim a queue slot before the first await. fetch_update
                // makes the bound check and the slot claim one atomic step,
                // so the queue can never exceed max_queue_size even on a
                // multi-threaded runtime.
                let max_queue = self.config.max_queue_size;
                let claimed = self
                    .waiting
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
                        if w < max_queue { Some(w + 1) } else { None }
                    });

                if claimed.is_err() {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(name = %self.config.name, "bulkhead queue full, rejecting call");
                    self.emit(ResilienceEvent::BulkheadRejected {
                        bulkhead: self.config.name.clone(),
                    });
                    return Err(BulkheadError::CapacityExceeded);
                }

                self.emit(ResilienceEvent::BulkheadQueued {
                    bulkhead: self.config.name.clone(),
                    queue_depth: self.queue_depth(),
                });

                // Tokio's semaphore is FIFO-fair, which gives the required
                // strict dequeue order.
                let acquired = self.semaphore.acquire().await;
                self.waiting.fetch_sub(1, Ordering::SeqCst);

                match acquired {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed; treated as rejection.
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(BulkheadError::CapacityExceeded);
                    }
                }
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);

        let result = tokio::time::timeout(self.config.timeout, f()).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        drop(permit);

        match result {
            Ok(Ok(value)) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.emit(ResilienceEvent::BulkheadSuccess {
                    bulkhead: self.config.name.clone(),
                });
                Ok(value)
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.emit(ResilienceEvent::BulkheadFailure {
                    bulkhead: self.config.name.clone(),
                    error: e.to_string(),
                });
                Err(BulkheadError::Execution(e))
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    name = %self.config.name,
                    timeout = ?self.config.timeout,
                    "bulkhead call timed out"
                );
                self.emit(ResilienceEvent::BulkheadFailure {
                    bulkhead: self.config.name.clone(),
                    error: format!("timed out after {:?}", self.config.timeout),
                });
                Err(BulkheadError::Timeout(self.config.timeout))
            }
        }
    }

    /// Execute only if a permit is free right now; never waits.
    pub async fn try_execute<F, Fut, T, E>(&self, f: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.semaphore.available_permits() == 0 {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            self.emit(ResilienceEvent::BulkheadRejected {
                bulkhead: self.config.name.clone(),
            });
            return Err(BulkheadError::CapacityExceeded);
        }

        self.execute(f).await
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            name: self.config.name.clone(),
            isolation: self.config.isolation,
            max_concurrent: self.config.max_concurrent,
            active: self.active_count(),
            queue_depth: self.queue_depth(),
            max_queue_size: self.config.max_queue_size,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: ResilienceEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

/// Bulkhead statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadStats {
    pub name: String,
    pub isolation: IsolationKind,
    pub max_concurrent: u32,
    pub active: u32,
    pub queue_depth: u32,
    pub max_queue_size: u32,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}

impl BulkheadStats {
    /// Utilization as a percentage of `max_concurrent`.
    pub fn utilization_pct(&self) -> f64 {
        if self.max_concurrent == 0 {
            0.0
        } else {
            self.active as f64 / self.max_concurrent as f64 * 100.0
        }
    }
}

/// Named bulkhead registry.
///
/// Unknown names are created on demand with the registry's default
/// configuration; call [`BulkheadRegistry::register`] first to override it.
pub struct BulkheadRegistry {
    entries: RwLock<HashMap<String, Arc<Bulkhead>>>,
    default_config: BulkheadConfig,
    events: Option<EventBus>,
}

impl BulkheadRegistry {
    /// Create an empty registry.
    pub fn new(events: Option<EventBus>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_config: BulkheadConfig::default(),
            events,
        }
    }

    /// Register a bulkhead with explicit configuration.
    pub fn register(&self, config: BulkheadConfig) -> Arc<Bulkhead> {
        let bulkhead = Bulkhead::with_events(config.clone(), self.events.clone());
        self.entries.write().insert(config.name, bulkhead.clone());
        bulkhead
    }

    /// Look up a bulkhead by name.
    pub fn get(&self, name: &str) -> Option<Arc<Bulkhead>> {
        self.entries.read().get(name).cloned()
    }

    /// Look up a bulkhead, creating it with defaults if missing.
    pub fn get_or_create(&self, name: &str) -> Arc<Bulkhead> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut config = self.default_config.clone();
        config.name = name.to_string();
        let bulkhead = Bulkhead::with_events(config, self.events.clone());

        let mut entries = self.entries.write();
        entries
            .entry(name.to_string())
            .or_insert(bulkhead)
            .clone()
    }

    /// Execute through the named bulkhead.
    pub async fn execute<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.get_or_create(name).execute(f).await
    }

    /// Statistics for every registered bulkhead.
    pub fn stats_all(&self) -> Vec<BulkheadStats> {
        let mut stats: Vec<BulkheadStats> =
            self.entries.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Total rejections across all partitions.
    pub fn total_rejections(&self) -> u64 {
        self.entries
            .read()
            .values()
            .map(|b| b.rejected.load(Ordering::Relaxed))
            .sum()
    }
}
