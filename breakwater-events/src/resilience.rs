//! Resilience event vocabulary.
//!
//! Every event the engine publishes is a variant of [`ResilienceEvent`],
//! carrying only the fields named by the publish/subscribe contract. The
//! tagged enum keeps subscribers statically checkable; there are no
//! free-form JSON payloads on the bus.

use crate::bus::EventBus;
use crate::event::{Event, EventMetadata};
use serde::Serialize;
use std::any::Any;

/// One variant per published event name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// `bulkhead:queued` - an operation is waiting for a permit.
    BulkheadQueued { bulkhead: String, queue_depth: u32 },

    /// `bulkhead:success` - an admitted operation completed.
    BulkheadSuccess { bulkhead: String },

    /// `bulkhead:failure` - an admitted operation failed or timed out.
    BulkheadFailure { bulkhead: String, error: String },

    /// `bulkhead:rejected` - the wait queue was full.
    BulkheadRejected { bulkhead: String },

    /// `circuit:open` - a breaker tripped.
    CircuitOpen { circuit: String },

    /// `circuit:closed` - a breaker recovered.
    CircuitClosed { circuit: String },

    /// `circuit:failure` - a call through a breaker failed.
    CircuitFailure { circuit: String, error: String },

    /// `circuit:rejected` - a call was refused while the breaker was open.
    CircuitRejected { circuit: String },

    /// `retry:attempt` - an attempt failed and a retry is scheduled.
    RetryAttempt { attempt: u32, delay_ms: u64 },

    /// `retry:success` - a retried operation eventually succeeded.
    RetrySuccess { attempt: u32 },

    /// `retry:exhausted` - all attempts failed.
    RetryExhausted { attempts: u32, error: String },

    /// `timeout:exceeded` - a deadline elapsed before the operation settled.
    TimeoutExceeded { name: String, elapsed_ms: u64 },

    /// `fallback:executed` - a degraded-mode handler ran successfully.
    FallbackExecuted { name: String },

    /// `fallback:failed` - a degraded-mode handler itself failed.
    FallbackFailed { name: String, error: String },

    /// `dlq:message` - a message entered a dead letter queue.
    DlqMessage { queue: String, message_id: String },

    /// `dlq:processed` - a dead-lettered message was reprocessed.
    DlqProcessed { queue: String, message_id: String },

    /// `dlq:failed` - reprocessing failed again.
    DlqFailed {
        queue: String,
        message_id: String,
        retries: u32,
    },

    /// `queue:enqueued` - a message entered a decoupling queue.
    QueueEnqueued {
        queue: String,
        message_id: String,
        priority: u8,
    },
}

impl ResilienceEvent {
    /// The colon-tagged event name.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::BulkheadQueued { .. } => "bulkhead:queued",
            Self::BulkheadSuccess { .. } => "bulkhead:success",
            Self::BulkheadFailure { .. } => "bulkhead:failure",
            Self::BulkheadRejected { .. } => "bulkhead:rejected",
            Self::CircuitOpen { .. } => "circuit:open",
            Self::CircuitClosed { .. } => "circuit:closed",
            Self::CircuitFailure { .. } => "circuit:failure",
            Self::CircuitRejected { .. } => "circuit:rejected",
            Self::RetryAttempt { .. } => "retry:attempt",
            Self::RetrySuccess { .. } => "retry:success",
            Self::RetryExhausted { .. } => "retry:exhausted",
            Self::TimeoutExceeded { .. } => "timeout:exceeded",
            Self::FallbackExecuted { .. } => "fallback:executed",
            Self::FallbackFailed { .. } => "fallback:failed",
            Self::DlqMessage { .. } => "dlq:message",
            Self::DlqProcessed { .. } => "dlq:processed",
            Self::DlqFailed { .. } => "dlq:failed",
            Self::QueueEnqueued { .. } => "queue:enqueued",
        }
    }
}

/// A resilience event as it travels over the bus: the tagged variant plus
/// identity and timing.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,

    #[serde(flatten)]
    pub kind: ResilienceEvent,
}

impl EngineEvent {
    pub fn new(kind: ResilienceEvent) -> Self {
        Self {
            metadata: EventMetadata::new(kind.tag()),
            kind,
        }
    }
}

impl Event for EngineEvent {
    fn event_name(&self) -> &str {
        &self.metadata.name
    }

    fn event_id(&self) -> uuid::Uuid {
        self.metadata.id
    }

    fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        self.metadata.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl EventBus {
    /// Fire-and-forget publish of a resilience event.
    ///
    /// Registries call this from synchronous paths (counter updates, state
    /// transitions), so delivery happens on a spawned task. Outside a tokio
    /// runtime the event is dropped rather than panicking.
    pub fn emit(&self, kind: ResilienceEvent) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let bus = self.clone();
            let event = EngineEvent::new(kind);
            handle.spawn(async move {
                let _ = bus.publish(event).await;
            });
        }
    }
}
