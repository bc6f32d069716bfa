//! Background processors driving the queues.
//!
//! A [`DlqProcessor`] periodically reprocesses and sweeps dead letter
//! queues; a [`QueueProcessor`] drains decoupling queues with a pool of
//! consumer tasks per queue. Both follow the same lifecycle: `start()`
//! spawns tokio tasks, `stop()` flips a shared running flag and aborts
//! them.

use crate::dead_letter::DeadLetterRegistry;
use crate::decoupling::DecouplingRegistry;
use crate::error::{QueueError, QueueResult};
use crate::message::{DeadLetterMessage, QueueMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Processor cadence configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// How often an idle processor polls its queue.
    pub poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handler for reprocessing a dead-lettered message.
pub type DlqHandler = Arc<
    dyn Fn(DeadLetterMessage) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// Handler for consuming a decoupling queue message.
pub type QueueHandler = Arc<
    dyn Fn(QueueMessage) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// Periodically reprocesses and sweeps dead letter queues.
pub struct DlqProcessor {
    registry: Arc<DeadLetterRegistry>,
    handlers: RwLock<HashMap<String, DlqHandler>>,
    config: ProcessorConfig,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DlqProcessor {
    pub fn new(registry: Arc<DeadLetterRegistry>, config: ProcessorConfig) -> Self {
        Self {
            registry,
            handlers: RwLock::new(HashMap::new()),
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register the reprocessing handler for a named queue.
    pub fn register_handler<F, Fut>(&self, queue: impl Into<String>, handler: F)
    where
        F: Fn(DeadLetterMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let handler: DlqHandler = Arc::new(move |msg| Box::pin(handler(msg)));
        self.handlers.write().insert(queue.into(), handler);
    }

    /// Whether the processor loops are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn one reprocessing loop per registered queue.
    pub fn start(&self) -> QueueResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::ProcessorAlreadyRunning);
        }

        let handlers: Vec<(String, DlqHandler)> = self
            .handlers
            .read()
            .iter()
            .map(|(name, h)| (name.clone(), h.clone()))
            .collect();
        info!(queues = handlers.len(), "dead letter processor starting");

        let mut handles = self.handles.lock();
        for (name, handler) in handlers {
            let registry = self.registry.clone();
            let running = self.running.clone();
            let poll_interval = self.config.poll_interval;

            handles.push(tokio::spawn(async move {
                let queue = registry.get_or_create(&name);
                let mut ticker = tokio::time::interval(poll_interval);
                while running.load(Ordering::SeqCst) {
                    ticker.tick().await;
                    let outcome = queue.reprocess(|msg| handler(msg)).await;
                    if outcome.terminal > 0 {
                        warn!(
                            queue = %name,
                            terminal = outcome.terminal,
                            "messages exhausted reprocessing attempts"
                        );
                    }
                    queue.sweep_expired();
                }
                debug!(queue = %name, "dead letter processor loop stopped");
            }));
        }
        Ok(())
    }

    /// Stop the reprocessing loops.
    pub fn stop(&self) -> QueueResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(QueueError::ProcessorNotRunning);
        }
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        info!("dead letter processor stopped");
        Ok(())
    }
}

/// Drains decoupling queues with a pool of consumer tasks per queue.
pub struct QueueProcessor {
    registry: Arc<DecouplingRegistry>,
    handlers: RwLock<HashMap<String, QueueHandler>>,
    config: ProcessorConfig,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueProcessor {
    pub fn new(registry: Arc<DecouplingRegistry>, config: ProcessorConfig) -> Self {
        Self {
            registry,
            handlers: RwLock::new(HashMap::new()),
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register the consumer handler for a named queue.
    pub fn register_handler<F, Fut>(&self, queue: impl Into<String>, handler: F)
    where
        F: Fn(QueueMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let handler: QueueHandler = Arc::new(move |msg| Box::pin(handler(msg)));
        self.handlers.write().insert(queue.into(), handler);
    }

    /// Whether the consumer loops are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn `processor_count` consumer tasks per registered queue.
    pub fn start(&self) -> QueueResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::ProcessorAlreadyRunning);
        }

        let handlers: Vec<(String, QueueHandler)> = self
            .handlers
            .read()
            .iter()
            .map(|(name, h)| (name.clone(), h.clone()))
            .collect();
        info!(queues = handlers.len(), "queue processor starting");

        let mut handles = self.handles.lock();
        for (name, handler) in handlers {
            let queue = self.registry.get_or_create(&name);

            for worker in 0..queue.processor_count() {
                let queue = queue.clone();
                let handler = handler.clone();
                let running = self.running.clone();
                let poll_interval = self.config.poll_interval;
                let name = name.clone();

                handles.push(tokio::spawn(async move {
                    debug!(queue = %name, worker, "consumer started");
                    while running.load(Ordering::SeqCst) {
                        match queue.dequeue() {
                            Some(mut message) => {
                                message.attempts += 1;
                                let id = message.id;
                                match handler(message).await {
                                    Ok(()) => queue.record_outcome(true),
                                    Err(error) => {
                                        warn!(
                                            queue = %name,
                                            message_id = %id,
                                            %error,
                                            "message processing failed"
                                        );
                                        queue.record_outcome(false);
                                    }
                                }
                            }
                            None => tokio::time::sleep(poll_interval).await,
                        }
                    }
                }));
            }
        }
        Ok(())
    }

    /// Stop the consumer loops.
    pub fn stop(&self) -> QueueResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(QueueError::ProcessorNotRunning);
        }
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        info!("queue processor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::{DeadLetterConfig, ReprocessPolicy};
    use crate::decoupling::DecouplingConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn fast_config() -> ProcessorConfig {
        ProcessorConfig::default().poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn dlq_processor_reprocesses_due_messages() {
        let registry = Arc::new(DeadLetterRegistry::new(None));
        registry.register(DeadLetterConfig::new("orders").reprocess(ReprocessPolicy {
            max_retries: 3,
            retry_delay: Duration::ZERO,
        }));
        registry.send_to_dead_letter("orders", json!({"order": 1}), "downstream 500");

        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();

        let processor = DlqProcessor::new(registry.clone(), fast_config());
        processor.register_handler("orders", move |_msg| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        processor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        processor.stop().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get("orders").unwrap().depth(), 0);
    }

    #[tokio::test]
    async fn queue_processor_drains_in_priority_order() {
        let registry = Arc::new(DecouplingRegistry::new(None));
        let queue = registry.register(DecouplingConfig::new("tasks"));
        queue.enqueue(json!("low"), 1).unwrap();
        queue.enqueue(json!("high"), 9).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let log = order.clone();

        let processor = QueueProcessor::new(registry, fast_config());
        processor.register_handler("tasks", move |msg| {
            let log = log.clone();
            async move {
                log.lock().push(msg.payload.clone());
                Ok(())
            }
        });

        processor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        processor.stop().unwrap();

        assert_eq!(*order.lock(), vec![json!("high"), json!("low")]);
        assert_eq!(queue.stats().processed, 2);
    }

    #[tokio::test]
    async fn failed_messages_are_counted_and_dropped() {
        let registry = Arc::new(DecouplingRegistry::new(None));
        let queue = registry.register(DecouplingConfig::new("tasks"));
        queue.enqueue(json!(1), 1).unwrap();

        let processor = QueueProcessor::new(registry, fast_config());
        processor.register_handler("tasks", |_msg| async { Err("boom".to_string()) });

        processor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        processor.stop().unwrap();

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.depth, 0);
    }

    #[tokio::test]
    async fn double_start_and_stop_are_errors() {
        let processor = DlqProcessor::new(
            Arc::new(DeadLetterRegistry::new(None)),
            ProcessorConfig::default(),
        );

        processor.start().unwrap();
        assert!(matches!(
            processor.start(),
            Err(QueueError::ProcessorAlreadyRunning)
        ));

        processor.stop().unwrap();
        assert!(matches!(
            processor.stop(),
            Err(QueueError::ProcessorNotRunning)
        ));
        assert!(!processor.is_running());
    }
}
