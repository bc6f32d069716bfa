//! Integration tests for common Breakwater workflows.
//!
//! These tests exercise the whole stack the way an application would:
//! one engine, policies composed per call site, queues drained by
//! background processors, and events observed over the shared bus.

use async_trait::async_trait;
use breakwater::prelude::*;
use breakwater::{
    DeadLetterConfig, EngineEvent, EventHandlerError, ProcessorConfig, QueueProcessor,
    ReprocessPolicy, TypedEventHandler,
};
use breakwater::{EventHandler, HealthStatus};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Route traces into the test harness so failures carry the engine's logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .try_init();
}

// =============================================================================
// Engine composition
// =============================================================================

#[tokio::test]
async fn protected_call_recovers_through_retry() {
    init_tracing();
    let engine = ResilienceEngine::new();
    let policy = ExecutionPolicy::named("payments")
        .timeout(Duration::from_secs(1))
        .retry(
            RetryPolicy::new(3)
                .base_delay(Duration::from_millis(1))
                .jitter(false),
        );

    let attempts = AtomicU32::new(0);
    let result: Result<&str, EngineError<String>> = engine
        .execute(&policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err("transient outage".to_string())
                } else {
                    Ok("charged")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "charged");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let status = engine.status();
    assert_eq!(status.metrics.retry_attempts, 1);
    assert_eq!(status.bulkheads.len(), 1);
    assert_eq!(status.circuits.len(), 1);
}

#[tokio::test]
async fn repeated_failures_trip_the_circuit_and_fallback_takes_over() {
    init_tracing();
    let engine = ResilienceEngine::new();
    engine.circuits().register(
        CircuitBreakerConfig::new("inventory")
            .failure_threshold(2)
            .reset_timeout(Duration::from_secs(60)),
    );
    engine
        .fallbacks()
        .register("inventory-cache", |_err| async {
            Ok(json!({"stock": "unknown"}))
        });

    let policy = ExecutionPolicy::default()
        .circuit("inventory")
        .fallback("inventory-cache");

    for _ in 0..2 {
        let _ = engine
            .execute_with_fallback(&policy, || async {
                Err::<serde_json::Value, _>("db down".to_string())
            })
            .await;
    }

    // Circuit is open: the operation is skipped, the cache answers.
    let invoked = AtomicU32::new(0);
    let result = engine
        .execute_with_fallback(&policy, || {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(json!({"stock": 3})) }
        })
        .await;

    assert_eq!(result.unwrap(), json!({"stock": "unknown"}));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(engine.metrics().circuit_breaker_trips, 1);
    assert!(engine.metrics().fallback_executions >= 1);
}

// =============================================================================
// Queues and processors
// =============================================================================

#[tokio::test]
async fn failed_work_lands_in_the_dlq_and_is_reprocessed() {
    init_tracing();
    let engine = Arc::new(ResilienceEngine::new());
    engine
        .dead_letters()
        .register(DeadLetterConfig::new("orders").reprocess(ReprocessPolicy {
            max_retries: 3,
            retry_delay: Duration::ZERO,
        }));

    engine
        .dead_letters()
        .send_to_dead_letter("orders", json!({"order": 17}), "downstream 503");
    assert_eq!(engine.metrics().dead_letter_messages, 1);

    let queue = engine.dead_letters().get("orders").unwrap();
    let outcome = queue.reprocess(|msg| async move {
        assert_eq!(msg.payload["order"], 17);
        Ok(())
    });
    assert_eq!(outcome.await.processed, 1);
    assert_eq!(queue.depth(), 0);
}

#[tokio::test]
async fn decoupling_queue_drains_in_priority_order() {
    init_tracing();
    let engine = Arc::new(ResilienceEngine::new());
    let queue = engine
        .decoupling()
        .register(DecouplingConfig::new("notifications").max_size(100));

    queue.enqueue(json!("digest email"), 1).unwrap();
    queue.enqueue(json!("page on-call"), 9).unwrap();
    queue.enqueue(json!("weekly report"), 1).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    let processor = QueueProcessor::new(
        engine.decoupling().clone(),
        ProcessorConfig::default().poll_interval(Duration::from_millis(10)),
    );
    processor.register_handler("notifications", move |msg| {
        let log = log.clone();
        async move {
            log.lock().push(msg.payload.clone());
            Ok(())
        }
    });

    processor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    processor.stop().unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen[0], json!("page on-call"));
    assert_eq!(seen.len(), 3);
}

// =============================================================================
// Events and health
// =============================================================================

struct TripCounter {
    trips: Arc<AtomicU32>,
}

#[async_trait]
impl EventHandler<EngineEvent> for TripCounter {
    async fn handle(&self, event: &EngineEvent) -> Result<(), EventHandlerError> {
        if matches!(event.kind, ResilienceEvent::CircuitOpen { .. }) {
            self.trips.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test]
async fn circuit_trips_are_observable_on_the_bus() {
    init_tracing();
    let engine = ResilienceEngine::new();
    let trips = Arc::new(AtomicU32::new(0));
    engine
        .events()
        .subscribe::<EngineEvent, _>(TypedEventHandler::new(TripCounter {
            trips: trips.clone(),
        }));

    engine
        .circuits()
        .register(CircuitBreakerConfig::new("llm").failure_threshold(1));
    let policy = ExecutionPolicy::default().circuit("llm");

    let _: Result<(), EngineError<&str>> =
        engine.execute(&policy, || async { Err("model down") }).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(trips.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_monitor_reflects_an_open_circuit() {
    init_tracing();
    let engine = Arc::new(ResilienceEngine::new());
    engine
        .circuits()
        .register(CircuitBreakerConfig::new("search").failure_threshold(5))
        .force_open();

    let monitor = HealthMonitor::new(
        engine,
        HealthMonitorConfig::default().interval(Duration::from_millis(10)),
    );
    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.stop().unwrap();

    let report = monitor.latest().unwrap();
    assert_eq!(report.status, HealthStatus::Down);
    assert!(report.components.iter().any(|c| c.name == "circuit:search"));
}
