//! Event bus and event vocabulary for the Breakwater resilience engine.
//!
//! Every registry in the engine publishes structured events to a shared
//! [`EventBus`]; the health monitor and external observability collaborators
//! subscribe to them. Events are statically typed: the whole vocabulary is
//! the [`ResilienceEvent`] enum, one variant per published event name.
//!
//! ## Quick Start
//!
//! ```
//! use breakwater_events::{EventBus, EngineEvent, ResilienceEvent};
//! use breakwater_events::{EventHandler, EventHandlerError, TypedEventHandler};
//! use async_trait::async_trait;
//!
//! struct TripLogger;
//!
//! #[async_trait]
//! impl EventHandler<EngineEvent> for TripLogger {
//!     async fn handle(&self, event: &EngineEvent) -> Result<(), EventHandlerError> {
//!         if let ResilienceEvent::CircuitOpen { circuit } = &event.kind {
//!             eprintln!("circuit tripped: {circuit}");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let bus = EventBus::new();
//! bus.subscribe::<EngineEvent, _>(TypedEventHandler::new(TripLogger));
//! ```

pub mod bus;
pub mod event;
pub mod resilience;

pub use bus::{EventBus, EventBusConfig, EventBusError};
pub use event::{
    DynEventHandler, Event, EventHandler, EventHandlerError, EventMetadata, TypedEventHandler,
};
pub use resilience::{EngineEvent, ResilienceEvent};
