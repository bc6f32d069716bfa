//! Priority decoupling queues.
//!
//! A decoupling queue absorbs bursts between a producer and its consumers.
//! Messages leave in descending priority order; equal priorities leave in
//! arrival order.

use crate::error::{QueueError, QueueResult};
use crate::message::{MessageId, QueueMessage};
use breakwater_events::{EventBus, ResilienceEvent};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Decoupling queue configuration.
#[derive(Debug, Clone)]
pub struct DecouplingConfig {
    /// Queue name.
    pub name: String,
    /// Messages held at once; enqueue fails beyond this.
    pub max_size: usize,
    /// Consumer tasks a [`QueueProcessor`](crate::processor::QueueProcessor)
    /// spawns for this queue.
    pub processor_count: usize,
}

impl Default for DecouplingConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_size: 1000,
            processor_count: 1,
        }
    }
}

impl DecouplingConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn processor_count(mut self, count: usize) -> Self {
        self.processor_count = count.max(1);
        self
    }
}

/// A bounded in-process priority queue.
pub struct DecouplingQueue {
    config: DecouplingConfig,
    // Kept sorted: descending priority, FIFO among equals.
    messages: Mutex<VecDeque<QueueMessage>>,
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    events: Option<EventBus>,
}

impl DecouplingQueue {
    pub fn new(config: DecouplingConfig) -> Arc<Self> {
        Self::with_events(config, None)
    }

    pub fn with_events(config: DecouplingConfig, events: Option<EventBus>) -> Arc<Self> {
        info!(
            name = %config.name,
            max_size = config.max_size,
            processors = config.processor_count,
            "decoupling queue initialized"
        );
        Arc::new(Self {
            config,
            messages: Mutex::new(VecDeque::new()),
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            events,
        })
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configured consumer count.
    pub fn processor_count(&self) -> usize {
        self.config.processor_count
    }

    /// Enqueue a message. Fails with [`QueueError::QueueFull`] at capacity.
    pub fn enqueue(&self, payload: Value, priority: u8) -> QueueResult<MessageId> {
        let message = QueueMessage::new(payload, priority);
        let id = message.id;

        let mut messages = self.messages.lock();
        if messages.len() >= self.config.max_size {
            return Err(QueueError::QueueFull);
        }

        // Binary search for the first strictly-lower priority keeps equal
        // priorities in arrival order.
        let pos = messages.partition_point(|m| m.priority >= priority);
        messages.insert(pos, message);
        drop(messages);

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        debug!(
            name = %self.config.name,
            message_id = %id,
            priority,
            "message enqueued"
        );
        if let Some(bus) = &self.events {
            bus.emit(ResilienceEvent::QueueEnqueued {
                queue: self.config.name.clone(),
                message_id: id.to_string(),
                priority,
            });
        }
        Ok(id)
    }

    /// Pop the highest-priority message, oldest among ties.
    pub fn dequeue(&self) -> Option<QueueMessage> {
        self.messages.lock().pop_front()
    }

    /// Record the outcome of processing a dequeued message. Failed
    /// messages are counted and dropped, not re-queued.
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Messages currently waiting.
    pub fn depth(&self) -> usize {
        self.messages.lock().len()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> DecouplingStats {
        let depth = self.depth();
        DecouplingStats {
            name: self.config.name.clone(),
            depth,
            capacity_pct: if self.config.max_size == 0 {
                0.0
            } else {
                depth as f64 / self.config.max_size as f64 * 100.0
            },
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Decoupling queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DecouplingStats {
    pub name: String,
    pub depth: usize,
    pub capacity_pct: f64,
    pub enqueued: u64,
    pub processed: u64,
    pub failed: u64,
}

/// Named decoupling queue registry.
pub struct DecouplingRegistry {
    queues: RwLock<HashMap<String, Arc<DecouplingQueue>>>,
    default_config: DecouplingConfig,
    events: Option<EventBus>,
}

impl DecouplingRegistry {
    pub fn new(events: Option<EventBus>) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            default_config: DecouplingConfig::default(),
            events,
        }
    }

    /// Register a queue with explicit configuration.
    pub fn register(&self, config: DecouplingConfig) -> Arc<DecouplingQueue> {
        let queue = DecouplingQueue::with_events(config.clone(), self.events.clone());
        self.queues.write().insert(config.name, queue.clone());
        queue
    }

    /// Look up a queue by name.
    pub fn get(&self, name: &str) -> Option<Arc<DecouplingQueue>> {
        self.queues.read().get(name).cloned()
    }

    /// Look up a queue, creating it with defaults if missing.
    pub fn get_or_create(&self, name: &str) -> Arc<DecouplingQueue> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut config = self.default_config.clone();
        config.name = name.to_string();
        let queue = DecouplingQueue::with_events(config, self.events.clone());

        let mut queues = self.queues.write();
        queues.entry(name.to_string()).or_insert(queue).clone()
    }

    /// Enqueue on the named queue, creating it with defaults if missing.
    pub fn enqueue(&self, name: &str, payload: Value, priority: u8) -> QueueResult<MessageId> {
        self.get_or_create(name).enqueue(payload, priority)
    }

    /// All registered queues.
    pub fn queues(&self) -> Vec<Arc<DecouplingQueue>> {
        self.queues.read().values().cloned().collect()
    }

    /// Statistics for every registered queue.
    pub fn stats_all(&self) -> Vec<DecouplingStats> {
        let mut stats: Vec<DecouplingStats> =
            self.queues.read().values().map(|q| q.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dequeues_in_descending_priority_order() {
        let queue = DecouplingQueue::new(DecouplingConfig::new("test"));
        queue.enqueue(json!("low"), 1).unwrap();
        queue.enqueue(json!("high"), 5).unwrap();
        queue.enqueue(json!("mid"), 3).unwrap();

        assert_eq!(queue.dequeue().unwrap().payload, json!("high"));
        assert_eq!(queue.dequeue().unwrap().payload, json!("mid"));
        assert_eq!(queue.dequeue().unwrap().payload, json!("low"));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn equal_priorities_keep_arrival_order() {
        let queue = DecouplingQueue::new(DecouplingConfig::new("test"));
        let first = queue.enqueue(json!("a"), 3).unwrap();
        let second = queue.enqueue(json!("b"), 3).unwrap();
        queue.enqueue(json!("c"), 7).unwrap();
        let third = queue.enqueue(json!("d"), 3).unwrap();

        assert_eq!(queue.dequeue().unwrap().payload, json!("c"));
        assert_eq!(queue.dequeue().unwrap().id, first);
        assert_eq!(queue.dequeue().unwrap().id, second);
        assert_eq!(queue.dequeue().unwrap().id, third);
    }

    #[test]
    fn enqueue_fails_when_full() {
        let queue = DecouplingQueue::new(DecouplingConfig::new("test").max_size(2));
        queue.enqueue(json!(1), 1).unwrap();
        queue.enqueue(json!(2), 1).unwrap();

        let result = queue.enqueue(json!(3), 9);
        assert!(matches!(result, Err(QueueError::QueueFull)));
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn outcome_counters_track_processing() {
        let queue = DecouplingQueue::new(DecouplingConfig::new("test"));
        queue.enqueue(json!(1), 1).unwrap();
        queue.enqueue(json!(2), 1).unwrap();

        queue.dequeue();
        queue.record_outcome(true);
        queue.dequeue();
        queue.record_outcome(false);

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.depth, 0);
    }

    #[test]
    fn registry_creates_queues_on_demand() {
        let registry = DecouplingRegistry::new(None);
        registry.enqueue("tasks", json!(1), 2).unwrap();
        registry.enqueue("tasks", json!(2), 8).unwrap();

        let queue = registry.get("tasks").unwrap();
        assert_eq!(queue.dequeue().unwrap().payload, json!(2));
        assert_eq!(registry.stats_all().len(), 1);
    }
}
