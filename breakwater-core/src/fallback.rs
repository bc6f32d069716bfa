//! Fallback handlers for degraded-mode responses.
//!
//! Operations register a named handler that produces a degraded-but-useful
//! result (a cached value, a default, an empty page) when the primary path
//! has failed. Handlers return [`serde_json::Value`] so the registry stays
//! agnostic to each operation's concrete response type.

use breakwater_events::{EventBus, ResilienceEvent};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// A degraded-mode handler. Receives the primary error's message.
pub type FallbackHandler =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync>;

/// Fallback error.
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no fallback registered for '{0}'")]
    NotRegistered(String),

    #[error("fallback '{name}' failed: {message}")]
    FallbackFailed { name: String, message: String },
}

/// Named fallback registry.
pub struct FallbackRegistry {
    handlers: RwLock<HashMap<String, FallbackHandler>>,
    executions: AtomicU64,
    failures: AtomicU64,
    events: Option<EventBus>,
}

impl FallbackRegistry {
    /// Create an empty registry.
    pub fn new(events: Option<EventBus>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            executions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            events,
        }
    }

    /// Register a handler under a name, replacing any previous one.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: FallbackHandler = Arc::new(move |err| Box::pin(handler(err)));
        self.handlers.write().insert(name.into(), handler);
    }

    /// Remove a handler.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    /// Whether a handler is registered under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Run the named handler with the primary error's message.
    pub async fn execute(&self, name: &str, error: impl Into<String>) -> Result<Value, FallbackError> {
        let handler = self
            .handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FallbackError::NotRegistered(name.to_string()))?;

        self.executions.fetch_add(1, Ordering::Relaxed);
        match handler(error.into()).await {
            Ok(value) => {
                debug!(name, "fallback produced a degraded response");
                self.emit(ResilienceEvent::FallbackExecuted {
                    name: name.to_string(),
                });
                Ok(value)
            }
            Err(message) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(name, %message, "fallback handler failed");
                self.emit(ResilienceEvent::FallbackFailed {
                    name: name.to_string(),
                    error: message.clone(),
                });
                Err(FallbackError::FallbackFailed {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Run the primary operation, falling back to the named handler on error.
    pub async fn run_with_fallback<F, Fut, E>(&self, name: &str, primary: F) -> Result<Value, FallbackError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        match primary().await {
            Ok(value) => Ok(value),
            Err(e) => self.execute(name, e.to_string()).await,
        }
    }

    /// Registry statistics.
    pub fn stats(&self) -> FallbackStats {
        FallbackStats {
            registered: self.handlers.read().len() as u32,
            executions: self.executions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: ResilienceEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

/// Fallback registry statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FallbackStats {
    pub registered: u32,
    pub executions: u64,
    pub failures: u64,
}

/// Ordered degraded-mode handlers tried in sequence; the first success wins.
///
/// Where the registry maps one name to one handler, a chain stacks several
/// degraded tiers for a single operation (fresh cache, stale cache, static
/// default). [`FallbackError::FallbackFailed`] surfaces only when every
/// handler has failed, carrying the last handler's name and error.
#[derive(Default)]
pub struct FallbackChain {
    handlers: Vec<(String, FallbackHandler)>,
}

impl FallbackChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the end of the chain.
    pub fn push<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: FallbackHandler = Arc::new(move |err| Box::pin(handler(err)));
        self.handlers.push((name.into(), handler));
        self
    }

    /// Handlers in the chain.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the chain against the primary error's message.
    ///
    /// Each handler sees the error that brought the call to its tier: the
    /// first handler gets the primary error, later handlers get the previous
    /// handler's failure.
    pub async fn execute(&self, error: impl Into<String>) -> Result<Value, FallbackError> {
        let mut error = error.into();
        let mut last_name = None;

        for (name, handler) in &self.handlers {
            match handler(error.clone()).await {
                Ok(value) => {
                    debug!(name = %name, "fallback chain produced a degraded response");
                    return Ok(value);
                }
                Err(message) => {
                    debug!(name = %name, %message, "fallback chain tier failed, trying next");
                    error = message;
                    last_name = Some(name.clone());
                }
            }
        }

        warn!("every fallback chain tier failed");
        Err(FallbackError::FallbackFailed {
            name: last_name.unwrap_or_else(|| "empty chain".to_string()),
            message: error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_fallback_produces_a_value() {
        let registry = FallbackRegistry::new(None);
        registry.register("search", |_err| async { Ok(json!({ "results": [] })) });

        let value = registry.execute("search", "index down").await.unwrap();
        assert_eq!(value, json!({ "results": [] }));
        assert_eq!(registry.stats().executions, 1);
    }

    #[tokio::test]
    async fn missing_fallback_is_an_error() {
        let registry = FallbackRegistry::new(None);
        let result = registry.execute("unknown", "boom").await;
        assert!(matches!(result, Err(FallbackError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn handler_sees_the_primary_error() {
        let registry = FallbackRegistry::new(None);
        registry.register("echo", |err| async move { Ok(json!({ "cause": err })) });

        let value = registry.execute("echo", "llm unavailable").await.unwrap();
        assert_eq!(value["cause"], "llm unavailable");
    }

    #[tokio::test]
    async fn failing_fallback_is_reported() {
        let registry = FallbackRegistry::new(None);
        registry.register("flaky", |_err| async { Err("cache also down".to_string()) });

        let result = registry.execute("flaky", "primary down").await;
        match result {
            Err(FallbackError::FallbackFailed { name, message }) => {
                assert_eq!(name, "flaky");
                assert_eq!(message, "cache also down");
            }
            other => panic!("expected fallback failure, got {other:?}"),
        }
        assert_eq!(registry.stats().failures, 1);
    }

    #[tokio::test]
    async fn run_with_fallback_prefers_the_primary() {
        let registry = FallbackRegistry::new(None);
        registry.register("op", |_err| async { Ok(json!("degraded")) });

        let value = registry
            .run_with_fallback("op", || async { Ok::<_, String>(json!("fresh")) })
            .await
            .unwrap();
        assert_eq!(value, json!("fresh"));
        assert_eq!(registry.stats().executions, 0);

        let value = registry
            .run_with_fallback("op", || async { Err::<Value, _>("down".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, json!("degraded"));
    }

    #[tokio::test]
    async fn chain_stops_at_the_first_success() {
        let second_ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = second_ran.clone();

        let chain = FallbackChain::new()
            .push("fresh-cache", |_err| async { Ok(json!("cached")) })
            .push("static-default", move |_err| {
                let flag = flag.clone();
                async move {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(json!("default"))
                }
            });

        let value = chain.execute("primary down").await.unwrap();
        assert_eq!(value, json!("cached"));
        assert!(!second_ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn chain_falls_through_failed_tiers() {
        let chain = FallbackChain::new()
            .push("fresh-cache", |_err| async { Err("cache miss".to_string()) })
            .push("stale-cache", |err| async move {
                // Each tier sees the previous tier's error.
                assert_eq!(err, "cache miss");
                Ok(json!({"stale": true}))
            });

        let value = chain.execute("primary down").await.unwrap();
        assert_eq!(value, json!({"stale": true}));
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_the_last_tier() {
        let chain = FallbackChain::new()
            .push("fresh-cache", |_err| async { Err("cache miss".to_string()) })
            .push("static-default", |_err| async { Err("no default".to_string()) });

        let result = chain.execute("primary down").await;
        match result {
            Err(FallbackError::FallbackFailed { name, message }) => {
                assert_eq!(name, "static-default");
                assert_eq!(message, "no default");
            }
            other => panic!("expected chain exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chain_fails_with_the_primary_error() {
        let chain = FallbackChain::new();
        assert!(chain.is_empty());

        let result = chain.execute("primary down").await;
        match result {
            Err(FallbackError::FallbackFailed { message, .. }) => {
                assert_eq!(message, "primary down");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reregistering_replaces_the_handler() {
        let registry = FallbackRegistry::new(None);
        registry.register("op", |_| async { Ok(json!(1)) });
        registry.register("op", |_| async { Ok(json!(2)) });

        let value = registry.execute("op", "err").await.unwrap();
        assert_eq!(value, json!(2));

        assert!(registry.unregister("op"));
        assert!(!registry.contains("op"));
    }
}
