//! Queueing for the Breakwater resilience engine.
//!
//! Two queue families, both in-process and bounded:
//!
//! - **Dead letter queues** park messages whose primary processing failed
//!   and retry them on an exponential schedule until they succeed, run out
//!   of attempts, or age past retention.
//! - **Decoupling queues** absorb bursts between producers and consumers,
//!   releasing messages in descending priority order with FIFO tie-breaks.
//!
//! Background [`processor`] loops drive both: reprocess-and-sweep ticks for
//! dead letter queues, consumer task pools for decoupling queues.
//!
//! ## Quick Start
//!
//! ```
//! use breakwater_queue::{DecouplingConfig, DecouplingQueue};
//! use serde_json::json;
//!
//! let queue = DecouplingQueue::new(DecouplingConfig::new("tasks").max_size(100));
//! queue.enqueue(json!({"task": "reindex"}), 5).unwrap();
//! queue.enqueue(json!({"task": "page-oncall"}), 9).unwrap();
//!
//! // Highest priority leaves first.
//! assert_eq!(queue.dequeue().unwrap().payload["task"], "page-oncall");
//! ```

pub mod dead_letter;
pub mod decoupling;
pub mod error;
pub mod message;
pub mod processor;

pub use dead_letter::{
    DeadLetterConfig, DeadLetterQueue, DeadLetterRegistry, DeadLetterStats, ReprocessOutcome,
    ReprocessPolicy,
};
pub use decoupling::{DecouplingConfig, DecouplingQueue, DecouplingRegistry, DecouplingStats};
pub use error::{QueueError, QueueResult};
pub use message::{DeadLetterMessage, MessageId, QueueMessage};
pub use processor::{DlqProcessor, ProcessorConfig, QueueProcessor};
