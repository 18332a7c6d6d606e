//! Event bus abstraction over the external message broker.
//!
//! Stages never talk to the broker directly. They publish [`Event`]s and
//! receive raw [`Message`]s through the [`EventBus`] trait, which keeps the
//! broker swappable (Redpanda/Kafka in production, an in-memory bus in tests).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  OrderReceived  ┌───────────┐  OrderConfirmed  ┌───────────┐
//! │  Intake  │ ──────────────▶ │ Inventory │ ───────────────▶ │ Warehouse │
//! └──────────┘                 └─────┬─────┘                  └─────┬─────┘
//!                                    │ Error                        │ Notification
//!                                    ▼                              ▼ OrderPickedPacked
//!                              ┌───────────┐               ┌──────────────┐
//!                              │ error     │               │ notification │
//!                              │ counter   │               │ time-to-ship │
//!                              └───────────┘               └──────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a message may be delivered more than once, so every
//!   consumer deduplicates with a [`CorrelationStore`](crate::store::CorrelationStore).
//! - **Ordered within partition**: no ordering holds across topics; a
//!   picked-and-packed event may arrive before its received event.
//! - **Keyed by event id**: the message key is `eventId`.

use crate::event::Event;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A delivered message could not be read (e.g. no payload)
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A raw message as delivered by the broker.
///
/// The payload is left undecoded: decode failures are a stage concern and are
/// handled as terminal for that message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was read from.
    pub topic: String,
    /// Message key, normally the event id.
    pub key: Option<Vec<u8>>,
    /// Message value, normally a JSON [`Event`].
    pub payload: Vec<u8>,
}

impl Message {
    /// The key as UTF-8 text, lossily converted.
    #[must_use]
    pub fn key_str(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }
}

/// Stream of messages from a subscription.
///
/// Each item is either a delivered message or a per-read transport error; an
/// error item does not end the stream.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, EventBusError>> + Send>>;

/// Future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Trait for broker implementations.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the bus can be
/// shared as `Arc<dyn EventBus>` between producers and consumers.
pub trait EventBus: Send + Sync {
    /// Publish an event to `topic`, keyed by its `event_id`.
    ///
    /// Resolves once the broker acknowledged the write.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] on serialization or transport
    /// failure.
    fn publish(&self, topic: &str, event: &Event) -> BusFuture<'_, ()>;

    /// Subscribe to `topics` as a member of consumer group `group_id`.
    ///
    /// A delivered message counts as handled once the stream is polled for
    /// the next item. Implementations with durable offsets commit it no
    /// earlier than that, so a stream dropped mid-handling leads to
    /// redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(&self, topics: &[&str], group_id: &str) -> BusFuture<'_, MessageStream>;

    /// Flush outstanding writes and release transport resources.
    ///
    /// The default does nothing, for buses without buffered writes.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TransportError`] if pending writes could not
    /// be flushed.
    fn close(&self) -> BusFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
