//! Topic-bound producer.
//!
//! A [`Producer`] publishes events to one configured topic through a shared
//! [`EventBus`]. Stages typically hold one producer per output topic plus one
//! for the error topic.

use crate::metrics::EventBusMetrics;
use fulfillment_core::event::Event;
use fulfillment_core::event_bus::{EventBus, EventBusError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Failure to publish an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to publish {event_name} event {event_id} to '{topic}': {source}")]
pub struct PublishError {
    /// Destination topic
    pub topic: String,
    /// Id of the event that was not published
    pub event_id: String,
    /// Name of the event that was not published
    pub event_name: String,
    /// Underlying transport or serialization error
    #[source]
    pub source: EventBusError,
}

/// Publishes events to a single topic.
#[derive(Clone)]
pub struct Producer {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl Producer {
    /// Create a producer for `topic` on `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// The topic this producer writes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `event`, keyed by its id, and wait for the broker's ack.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on serialization or transport failure. Nothing
    /// is retried here; the caller decides whether to escalate.
    pub async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let started = Instant::now();
        match self.bus.publish(&self.topic, event).await {
            Ok(()) => {
                EventBusMetrics::record_publish(&self.topic, started.elapsed());
                tracing::info!(
                    topic = %self.topic,
                    event_id = %event.event_id,
                    event_name = %event.event_name,
                    "Published event"
                );
                Ok(())
            }
            Err(source) => {
                EventBusMetrics::record_publish_error(&self.topic);
                Err(PublishError {
                    topic: self.topic.clone(),
                    event_id: event.event_id.clone(),
                    event_name: event.event_name.clone(),
                    source,
                })
            }
        }
    }

    /// Flush pending writes. Call once at shutdown.
    ///
    /// # Errors
    ///
    /// Returns the bus error if outstanding writes could not be flushed.
    pub async fn close(&self) -> Result<(), EventBusError> {
        self.bus.close().await
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
