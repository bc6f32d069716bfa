//! Health monitoring.
//!
//! The [`HealthMonitor`] samples every registry on a fixed interval and
//! rolls the readings into a [`HealthReport`]: per-component status from
//! saturation (bulkhead utilization, queue fill, circuit state) and the
//! worst of them as the overall status. The latest report is kept in a
//! read-only snapshot for status endpoints to serve without touching the
//! registries.

use crate::circuit_breaker::CircuitState;
use crate::engine::ResilienceEngine;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Component health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally.
    Up,
    /// Saturated or recovering; still serving.
    Degraded,
    /// Unavailable or fully saturated.
    Down,
}

/// One sampled component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub detail: String,
}

/// A full health sample.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst component status.
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Sampling cadence.
    pub interval: Duration,
    /// Saturation percentage at which a component reads degraded.
    pub degraded_pct: f64,
    /// Saturation percentage at which a component reads down.
    pub down_pct: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            degraded_pct: 75.0,
            down_pct: 95.0,
        }
    }
}

impl HealthMonitorConfig {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn degraded_pct(mut self, pct: f64) -> Self {
        self.degraded_pct = pct;
        self
    }

    pub fn down_pct(mut self, pct: f64) -> Self {
        self.down_pct = pct;
        self
    }
}

/// Monitor lifecycle errors.
#[derive(Debug, Error)]
pub enum HealthMonitorError {
    #[error("health monitor is already running")]
    AlreadyRunning,

    #[error("health monitor is not running")]
    NotRunning,
}

/// Samples the engine's registries on an interval.
pub struct HealthMonitor {
    engine: Arc<ResilienceEngine>,
    config: HealthMonitorConfig,
    snapshot: Arc<RwLock<Option<HealthReport>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(engine: Arc<ResilienceEngine>, config: HealthMonitorConfig) -> Self {
        Self {
            engine,
            config,
            snapshot: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Whether the sampling loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The most recent report, if a sample has been taken.
    pub fn latest(&self) -> Option<HealthReport> {
        self.snapshot.read().clone()
    }

    /// Take one sample immediately.
    pub fn check(&self) -> HealthReport {
        let report = sample(&self.engine, &self.config);
        for component in &report.components {
            if component.status != HealthStatus::Up {
                warn!(
                    component = %component.name,
                    status = ?component.status,
                    detail = %component.detail,
                    "component saturated"
                );
            }
        }
        *self.snapshot.write() = Some(report.clone());
        report
    }

    /// Spawn the sampling loop.
    pub fn start(&self) -> Result<(), HealthMonitorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HealthMonitorError::AlreadyRunning);
        }

        let engine = self.engine.clone();
        let config = self.config.clone();
        let snapshot = self.snapshot.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let report = sample(&engine, &config);
                for component in &report.components {
                    if component.status != HealthStatus::Up {
                        warn!(
                            component = %component.name,
                            status = ?component.status,
                            detail = %component.detail,
                            "component saturated"
                        );
                    }
                }
                debug!(status = ?report.status, "health sampled");
                *snapshot.write() = Some(report);
            }
        });
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the sampling loop. The last report stays readable.
    pub fn stop(&self) -> Result<(), HealthMonitorError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(HealthMonitorError::NotRunning);
        }
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

fn saturation_status(pct: f64, config: &HealthMonitorConfig) -> HealthStatus {
    if pct >= config.down_pct {
        HealthStatus::Down
    } else if pct >= config.degraded_pct {
        HealthStatus::Degraded
    } else {
        HealthStatus::Up
    }
}

fn sample(engine: &ResilienceEngine, config: &HealthMonitorConfig) -> HealthReport {
    let status = engine.status();
    let mut components = Vec::new();

    for b in &status.bulkheads {
        let pct = b.utilization_pct();
        components.push(ComponentHealth {
            name: format!("bulkhead:{}", b.name),
            status: saturation_status(pct, config),
            detail: format!(
                "{:.0}% utilized, {} queued, {} rejected",
                pct, b.queue_depth, b.rejected
            ),
        });
    }

    for c in &status.circuits {
        let state = match c.state {
            CircuitState::Closed => HealthStatus::Up,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Down,
        };
        components.push(ComponentHealth {
            name: format!("circuit:{}", c.name),
            status: state,
            detail: format!("{}, {} trips", c.state, c.trips),
        });
    }

    for q in &status.dead_letters {
        components.push(ComponentHealth {
            name: format!("dlq:{}", q.name),
            status: saturation_status(q.capacity_pct, config),
            detail: format!("{} parked ({:.0}% of capacity)", q.depth, q.capacity_pct),
        });
    }

    for q in &status.queues {
        components.push(ComponentHealth {
            name: format!("queue:{}", q.name),
            status: saturation_status(q.capacity_pct, config),
            detail: format!("{} waiting ({:.0}% of capacity)", q.depth, q.capacity_pct),
        });
    }

    let overall = components
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Up);

    HealthReport {
        status: overall,
        components,
        checked_at: Utc::now(),
    }
}
