//! In-process event bus.

use crate::event::{DynEventHandler, Event, EventHandlerError};
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;
use tracing::{debug, error};

/// Event bus for in-process publishing and handling.
///
/// Handlers are registered per event type; `publish` invokes every handler
/// registered for the event's type and waits for all of them.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<DashMap<TypeId, Vec<Arc<dyn DynEventHandler>>>>,
    config: Arc<EventBusConfig>,
}

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Keep invoking remaining handlers after one fails.
    pub continue_on_error: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            continue_on_error: true,
        }
    }
}

impl EventBus {
    /// Create a new event bus with default configuration.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create an event bus with custom configuration.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    /// Subscribe a handler for an event type.
    pub fn subscribe<E, H>(&self, handler: H)
    where
        E: Event,
        H: DynEventHandler + 'static,
    {
        let type_id = TypeId::of::<E>();
        self.handlers
            .entry(type_id)
            .or_default()
            .push(Arc::new(handler));
        debug!(event_type = ?type_id, "handler subscribed");
    }

    /// Publish an event to every handler registered for its type.
    pub async fn publish<E: Event>(&self, event: E) -> Result<(), EventBusError> {
        let type_id = TypeId::of::<E>();

        let handlers = match self.handlers.get(&type_id) {
            Some(handlers) => handlers.clone(),
            None => return Ok(()),
        };

        let event: Arc<dyn Event> = Arc::new(event);
        let mut errors = Vec::new();

        for handler in handlers.iter() {
            match handler.handle_dyn(event.as_ref()).await {
                Ok(()) => {}
                Err(e) => {
                    error!(event = event.event_name(), error = %e, "event handler failed");
                    errors.push(e);
                    if !self.config.continue_on_error {
                        break;
                    }
                }
            }
        }

        if !errors.is_empty() && !self.config.continue_on_error {
            return Err(EventBusError::HandlersFailed(errors));
        }

        Ok(())
    }

    /// Unsubscribe all handlers for an event type.
    pub fn unsubscribe<E: Event>(&self) {
        self.handlers.remove(&TypeId::of::<E>());
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Number of handlers registered for an event type.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event bus errors.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("one or more handlers failed")]
    HandlersFailed(Vec<EventHandlerError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHandler, EventMetadata, TypedEventHandler};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::any::Any;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct PingEvent {
        metadata: EventMetadata,
    }

    impl PingEvent {
        fn new() -> Self {
            Self {
                metadata: EventMetadata::new("ping"),
            }
        }
    }

    impl Event for PingEvent {
        fn event_name(&self) -> &str {
            &self.metadata.name
        }
        fn event_id(&self) -> Uuid {
            self.metadata.id
        }
        fn timestamp(&self) -> DateTime<Utc> {
            self.metadata.timestamp
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Clone)]
    struct Counter {
        hits: Arc<AtomicU32>,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                hits: Arc::new(AtomicU32::new(0)),
            }
        }

        fn count(&self) -> u32 {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler<PingEvent> for Counter {
        async fn handle(&self, _event: &PingEvent) -> Result<(), EventHandlerError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_handler() {
        let bus = EventBus::new();
        let first = Counter::new();
        let second = Counter::new();

        bus.subscribe::<PingEvent, _>(TypedEventHandler::new(first.clone()));
        bus.subscribe::<PingEvent, _>(TypedEventHandler::new(second.clone()));

        bus.publish(PingEvent::new()).await.unwrap();

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[tokio::test]
    async fn publish_without_handlers_is_ok() {
        let bus = EventBus::new();
        assert!(bus.publish(PingEvent::new()).await.is_ok());
    }

    #[tokio::test]
    async fn handler_count_tracks_subscriptions() {
        let bus = EventBus::new();
        assert_eq!(bus.handler_count::<PingEvent>(), 0);

        bus.subscribe::<PingEvent, _>(TypedEventHandler::new(Counter::new()));
        bus.subscribe::<PingEvent, _>(TypedEventHandler::new(Counter::new()));
        assert_eq!(bus.handler_count::<PingEvent>(), 2);

        bus.unsubscribe::<PingEvent>();
        assert_eq!(bus.handler_count::<PingEvent>(), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        struct Failing;

        #[async_trait]
        impl EventHandler<PingEvent> for Failing {
            async fn handle(&self, _event: &PingEvent) -> Result<(), EventHandlerError> {
                Err(EventHandlerError::HandlerFailed("boom".to_string()))
            }
        }

        let bus = EventBus::new();
        let counter = Counter::new();

        bus.subscribe::<PingEvent, _>(TypedEventHandler::new(Failing));
        bus.subscribe::<PingEvent, _>(TypedEventHandler::new(counter.clone()));

        bus.publish(PingEvent::new()).await.unwrap();
        assert_eq!(counter.count(), 1);
    }
}
