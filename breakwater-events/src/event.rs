//! Event trait and handler machinery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use uuid::Uuid;

/// Trait implemented by everything published through the bus.
pub trait Event: Send + Sync + Debug + 'static {
    /// Colon-tagged event name, e.g. `bulkhead:rejected`.
    fn event_name(&self) -> &str;

    /// Unique event ID.
    fn event_id(&self) -> Uuid;

    /// When the event was created.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Cast to Any for downcasting in type-erased handlers.
    fn as_any(&self) -> &dyn Any;
}

/// Identity and timing shared by all events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub id: Uuid,

    /// Event name/tag
    pub name: String,

    /// Timestamp when the event was created
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Typed event handler.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    /// Handle the event.
    async fn handle(&self, event: &E) -> Result<(), EventHandlerError>;
}

/// Handler failure.
#[derive(Debug, thiserror::Error)]
pub enum EventHandlerError {
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    #[error("event processing error: {0}")]
    ProcessingError(String),
}

/// Type-erased event handler stored by the bus.
#[async_trait]
pub trait DynEventHandler: Send + Sync {
    async fn handle_dyn(&self, event: &dyn Event) -> Result<(), EventHandlerError>;
}

/// Wrapper adapting a typed handler to the type-erased bus.
pub struct TypedEventHandler<E: Event, H: EventHandler<E>> {
    handler: H,
    _phantom: std::marker::PhantomData<fn(&E)>,
}

impl<E: Event, H: EventHandler<E>> TypedEventHandler<E, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _phantom: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<E: Event, H: EventHandler<E> + 'static> DynEventHandler for TypedEventHandler<E, H> {
    async fn handle_dyn(&self, event: &dyn Event) -> Result<(), EventHandlerError> {
        if let Some(typed) = event.as_any().downcast_ref::<E>() {
            self.handler.handle(typed).await
        } else {
            Err(EventHandlerError::HandlerFailed(
                "event type mismatch".to_string(),
            ))
        }
    }
}
