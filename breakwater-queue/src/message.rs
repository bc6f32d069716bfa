//! Message types carried by the queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message identifier.
pub type MessageId = Uuid;

/// A message parked in a dead letter queue after its primary processing
/// failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    /// Unique message id.
    pub id: MessageId,
    /// The original payload.
    pub payload: Value,
    /// The error that dead-lettered it.
    pub original_error: String,
    /// When the message entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Reprocessing attempts made so far.
    pub retries: u32,
    /// Earliest time the next reprocessing attempt may run.
    pub next_retry_at: DateTime<Utc>,
    /// All reprocessing attempts are spent; awaiting retention sweep.
    pub terminal: bool,
}

impl DeadLetterMessage {
    pub fn new(payload: Value, error: impl Into<String>, retry_delay: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            original_error: error.into(),
            enqueued_at: now,
            retries: 0,
            next_retry_at: now + retry_delay,
            terminal: false,
        }
    }

    /// Whether the message is due for a reprocessing attempt.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.terminal && self.next_retry_at <= now
    }
}

/// A message in a priority decoupling queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message id.
    pub id: MessageId,
    /// The payload.
    pub payload: Value,
    /// Dequeue priority; higher values leave first.
    pub priority: u8,
    /// When the message was enqueued (FIFO tie-break among equal priorities).
    pub enqueued_at: DateTime<Utc>,
    /// Processing attempts made.
    pub attempts: u32,
}

impl QueueMessage {
    pub fn new(payload: Value, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            priority,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}
