//! Dead letter queues.
//!
//! Messages whose primary processing failed are parked here and retried on
//! an exponential schedule. A message that spends all its reprocessing
//! attempts is marked terminal but stays visible for inspection until the
//! retention sweep removes it.

use crate::error::{QueueError, QueueResult};
use crate::message::{DeadLetterMessage, MessageId};
use breakwater_events::{EventBus, ResilienceEvent};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reprocessing schedule for dead-lettered messages.
#[derive(Debug, Clone)]
pub struct ReprocessPolicy {
    /// Reprocessing attempts before a message is marked terminal.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * 2^n`.
    pub retry_delay: Duration,
}

impl Default for ReprocessPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
        }
    }
}

/// Dead letter queue configuration.
#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    /// Queue name.
    pub name: String,
    /// Messages held at once; the oldest is evicted beyond this.
    pub max_size: usize,
    /// How long messages stay visible before the sweep removes them.
    pub retention_time: Duration,
    /// Reprocessing schedule.
    pub reprocess: ReprocessPolicy,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_size: 1000,
            retention_time: Duration::from_secs(24 * 60 * 60),
            reprocess: ReprocessPolicy::default(),
        }
    }
}

impl DeadLetterConfig {
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

    pub fn retention_time(mut self, retention: Duration) -> Self {
        self.retention_time = retention;
        self
    }

    pub fn reprocess(mut self, policy: ReprocessPolicy) -> Self {
        self.reprocess = policy;
        self
    }
}

/// Outcome of one reprocessing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReprocessOutcome {
    /// Messages handled successfully and removed.
    pub processed: u32,
    /// Messages that failed again and were rescheduled.
    pub rescheduled: u32,
    /// Messages that ran out of attempts and became terminal.
    pub terminal: u32,
}

/// A bounded in-process dead letter queue.
pub struct DeadLetterQueue {
    config: DeadLetterConfig,
    messages: Mutex<Vec<DeadLetterMessage>>,
    total: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
    events: Option<EventBus>,
}

impl DeadLetterQueue {
    pub fn new(config: DeadLetterConfig) -> Arc<Self> {
        Self::with_events(config, None)
    }

    pub fn with_events(config: DeadLetterConfig, events: Option<EventBus>) -> Arc<Self> {
        info!(
            name = %config.name,
            max_size = config.max_size,
            retention = ?config.retention_time,
            "dead letter queue initialized"
        );
        Arc::new(Self {
            config,
            messages: Mutex::new(Vec::new()),
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            events,
        })
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Park a failed message. At capacity the oldest message is evicted
    /// first; the push itself never fails.
    pub fn push(&self, payload: Value, error: impl Into<String>) -> MessageId {
        let retry_delay = chrono_delay(self.config.reprocess.retry_delay);
        let message = DeadLetterMessage::new(payload, error, retry_delay);
        let id = message.id;

        let mut messages = self.messages.lock();
        if messages.len() >= self.config.max_size && !messages.is_empty() {
            let evicted = messages.remove(0);
            self.expired.fetch_add(1, Ordering::Relaxed);
            warn!(
                name = %self.config.name,
                evicted = %evicted.id,
                "dead letter queue full, evicting oldest message"
            );
        }
        messages.push(message);
        drop(messages);

        self.total.fetch_add(1, Ordering::Relaxed);
        debug!(name = %self.config.name, message_id = %id, "message dead-lettered");
        self.emit(ResilienceEvent::DlqMessage {
            queue: self.config.name.clone(),
            message_id: id.to_string(),
        });
        id
    }

    /// Run one reprocessing pass over every due message.
    ///
    /// Success removes the message; failure reschedules it with an
    /// exponentially growing delay, or marks it terminal once the attempt
    /// budget is spent. Terminal messages stay in the queue until
    /// [`sweep_expired`](Self::sweep_expired) removes them.
    pub async fn reprocess<F, Fut>(&self, handler: F) -> ReprocessOutcome
    where
        F: Fn(DeadLetterMessage) -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let now = Utc::now();
        let due: Vec<DeadLetterMessage> = {
            let messages = self.messages.lock();
            messages
                .iter()
                .filter(|m| m.is_due(now) && m.retries < self.config.reprocess.max_retries)
                .cloned()
                .collect()
        };

        let mut outcome = ReprocessOutcome::default();
        for message in due {
            let id = message.id;
            match handler(message).await {
                Ok(()) => {
                    self.remove(id);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    outcome.processed += 1;
                    debug!(name = %self.config.name, message_id = %id, "dead-lettered message reprocessed");
                    self.emit(ResilienceEvent::DlqProcessed {
                        queue: self.config.name.clone(),
                        message_id: id.to_string(),
                    });
                }
                Err(error) => {
                    let retries = self.reschedule(id);
                    if let Some(retries) = retries {
                        if retries >= self.config.reprocess.max_retries {
                            self.failed.fetch_add(1, Ordering::Relaxed);
                            outcome.terminal += 1;
                            warn!(
                                name = %self.config.name,
                                message_id = %id,
                                retries,
                                %error,
                                "dead-lettered message exhausted reprocessing attempts"
                            );
                            self.emit(ResilienceEvent::DlqFailed {
                                queue: self.config.name.clone(),
                                message_id: id.to_string(),
                                retries,
                            });
                        } else {
                            outcome.rescheduled += 1;
                        }
                    }
                }
            }
        }
        outcome
    }

    /// Bump a message's retry count and push its next attempt out.
    /// Returns the new retry count, or `None` if the message is gone.
    fn reschedule(&self, id: MessageId) -> Option<u32> {
        let mut messages = self.messages.lock();
        let message = messages.iter_mut().find(|m| m.id == id)?;
        message.retries += 1;

        if message.retries >= self.config.reprocess.max_retries {
            message.terminal = true;
        } else {
            let shift = message.retries.min(20);
            let delay_ms = self.config.reprocess.retry_delay.as_millis() as u64;
            let backoff = Duration::from_millis(delay_ms.saturating_mul(1u64 << shift));
            message.next_retry_at = Utc::now() + chrono_delay(backoff);
        }
        Some(message.retries)
    }

    fn remove(&self, id: MessageId) {
        let mut messages = self.messages.lock();
        messages.retain(|m| m.id != id);
    }

    /// Remove messages older than the retention time. Returns how many
    /// were swept.
    pub fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono_delay(self.config.retention_time);
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| m.enqueued_at > cutoff);
        let swept = before - messages.len();
        drop(messages);

        if swept > 0 {
            self.expired.fetch_add(swept as u64, Ordering::Relaxed);
            info!(name = %self.config.name, swept, "swept expired dead-lettered messages");
        }
        swept
    }

    /// Current messages, oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetterMessage> {
        self.messages.lock().clone()
    }

    /// Messages currently held.
    pub fn depth(&self) -> usize {
        self.messages.lock().len()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> DeadLetterStats {
        let depth = self.depth();
        DeadLetterStats {
            name: self.config.name.clone(),
            depth,
            capacity_pct: if self.config.max_size == 0 {
                0.0
            } else {
                depth as f64 / self.config.max_size as f64 * 100.0
            },
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: ResilienceEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

fn chrono_delay(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}

/// Dead letter queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterStats {
    pub name: String,
    pub depth: usize,
    pub capacity_pct: f64,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub expired: u64,
}

/// Named dead letter queue registry.
pub struct DeadLetterRegistry {
    queues: RwLock<HashMap<String, Arc<DeadLetterQueue>>>,
    default_config: DeadLetterConfig,
    events: Option<EventBus>,
}

impl DeadLetterRegistry {
    pub fn new(events: Option<EventBus>) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            default_config: DeadLetterConfig::default(),
            events,
        }
    }

    /// Register a queue with explicit configuration.
    pub fn register(&self, config: DeadLetterConfig) -> Arc<DeadLetterQueue> {
        let queue = DeadLetterQueue::with_events(config.clone(), self.events.clone());
        self.queues.write().insert(config.name, queue.clone());
        queue
    }

    /// Look up a queue by name.
    pub fn get(&self, name: &str) -> Option<Arc<DeadLetterQueue>> {
        self.queues.read().get(name).cloned()
    }

    /// Look up a queue, creating it with defaults if missing.
    pub fn get_or_create(&self, name: &str) -> Arc<DeadLetterQueue> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut config = self.default_config.clone();
        config.name = name.to_string();
        let queue = DeadLetterQueue::with_events(config, self.events.clone());

        let mut queues = self.queues.write();
        queues.entry(name.to_string()).or_insert(queue).clone()
    }

    /// Park a failed message on the named queue.
    pub fn send_to_dead_letter(
        &self,
        name: &str,
        payload: Value,
        error: impl Into<String>,
    ) -> MessageId {
        self.get_or_create(name).push(payload, error)
    }

    /// Registered queue names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Statistics for every registered queue.
    pub fn stats_all(&self) -> Vec<DeadLetterStats> {
        let mut stats: Vec<DeadLetterStats> =
            self.queues.read().values().map(|q| q.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Messages currently parked across all queues.
    pub fn total_depth(&self) -> usize {
        self.queues.read().values().map(|q| q.depth()).sum()
    }

    /// Find a queue or fail with [`QueueError::UnknownQueue`].
    pub fn require(&self, name: &str) -> QueueResult<Arc<DeadLetterQueue>> {
        self.get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }
}
