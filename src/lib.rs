// Breakwater - a resilience engine for async Rust services.
//
// This crate re-exports the engine, queue and event crates behind one
// dependency for applications that want the whole stack.

// Re-export core functionality
pub use breakwater_core::*;

// Re-export the event bus and event vocabulary
pub use breakwater_events::{
    EngineEvent, Event, EventBus, EventBusConfig, EventBusError, EventHandler, EventHandlerError,
    EventMetadata, ResilienceEvent, TypedEventHandler,
};

// Re-export the queues and their processors
pub use breakwater_queue::{
    DeadLetterConfig, DeadLetterMessage, DeadLetterQueue, DeadLetterRegistry, DeadLetterStats,
    DecouplingConfig, DecouplingQueue, DecouplingRegistry, DecouplingStats, DlqProcessor,
    MessageId, ProcessorConfig, QueueError, QueueMessage, QueueProcessor, QueueResult,
    ReprocessOutcome, ReprocessPolicy,
};

/// Everything most callers need.
pub mod prelude {
    pub use crate::{
        BackoffKind, BulkheadConfig, CircuitBreakerConfig, DeadLetterConfig, DecouplingConfig,
        EngineError, EventBus, ExecutionPolicy, HealthMonitor, HealthMonitorConfig,
        ResilienceEngine, ResilienceEvent, RetryPolicy,
    };
}
