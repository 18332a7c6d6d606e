//! Redpanda event bus for the order-fulfillment pipeline.
//!
//! This crate implements the [`EventBus`] trait from `fulfillment-core` on top
//! of rdkafka, so it works against Redpanda, Apache Kafka, or any other
//! Kafka-compatible broker.
//!
//! # Wire Format
//!
//! - **Key**: the event's `eventId`
//! - **Value**: the JSON envelope (`eventId`, `eventName`, `timestamp`,
//!   `eventBody`, optional `errorMessage`)
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - A message is acknowledged when the subscriber polls the stream for the
//!   next item, i.e. after it finished handling the previous one
//! - Its offset is committed only once acknowledged; the consumer task reads
//!   nothing further until then
//! - If the process crashes or the stream is dropped before that, the message
//!   is redelivered
//! - Subscribers MUST be idempotent
//! - Ordering is guaranteed within a partition only
//!
//! # Example
//!
//! ```no_run
//! use fulfillment_core::event::{Event, EventName};
//! use fulfillment_core::event_bus::EventBus;
//! use fulfillment_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:29092")?;
//!
//! let event = Event::new(EventName::OrderReceived, "{}");
//! event_bus.publish("order-received", &event).await?;
//!
//! let mut stream = event_bus.subscribe(&["order-received"], "inventory-group").await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("Received {} bytes", message.payload.len()),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use fulfillment_core::event::Event;
use fulfillment_core::event_bus::{BusFuture, EventBus, EventBusError, Message, MessageStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A delivery and the acknowledgement the consumer task waits on before
/// committing it. Transport errors carry no acknowledgement.
type Handoff = (Result<Message, EventBusError>, Option<oneshot::Sender<()>>);

/// Redpanda event bus implementation.
///
/// One instance owns a single producer shared by every publish call; each
/// [`subscribe`](EventBus::subscribe) creates its own consumer in the given
/// consumer group.
///
/// # Example
///
/// ```no_run
/// use fulfillment_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:29092")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing events
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. `"localhost:29092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where new consumer groups start reading: `"earliest"`, `"latest"`
    /// or `"error"`.
    ///
    /// Default: `"earliest"`, so a stage that starts after its upstream has
    /// already published still sees those orders.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            compression = %compression,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            auto_offset_reset,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(&self, topic: &str, event: &Event) -> BusFuture<'_, ()> {
        let topic = topic.to_string();
        let event_id = event.event_id.clone();
        let event_name = event.event_name.clone();
        let encoded = event.encode();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = encoded.map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

            let record = FutureRecord::to(&topic)
                .payload(&payload)
                .key(event_id.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        event_id = %event_id,
                        event_name = %event_name,
                        "Event published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        event_id = %event_id,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(&self, topics: &[&str], group_id: &str) -> BusFuture<'_, MessageStream> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let group_id = group_id.to_string();
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false") // Manual commit for at-least-once
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                group_id = %group_id,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(1);

            // The task owns the consumer; it exits when the subscriber drops
            // the stream.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let item = match message.payload() {
                                Some(payload) => Ok(Message {
                                    topic: message.topic().to_string(),
                                    key: message.key().map(<[u8]>::to_vec),
                                    payload: payload.to_vec(),
                                }),
                                None => Err(EventBusError::MalformedMessage(format!(
                                    "message at {}/{}/{} has no payload",
                                    message.topic(),
                                    message.partition(),
                                    message.offset()
                                ))),
                            };

                            if !hand_off(&tx, item).await {
                                tracing::debug!(
                                    topic = message.topic(),
                                    offset = message.offset(),
                                    "Subscriber dropped before acknowledging, exiting consumer task"
                                );
                                break; // Exit WITHOUT committing
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err = EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send((Err(err), None)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = acknowledging_stream(rx);

            Ok(Box::pin(stream) as MessageStream)
        })
    }

    fn close(&self) -> BusFuture<'_, ()> {
        let timeout = self.timeout;
        let producer = self.producer.clone();
        Box::pin(async move {
            // `flush` blocks the calling thread until delivery or timeout.
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| EventBusError::TransportError(format!("Flush task failed: {e}")))?
                .map_err(|e| EventBusError::TransportError(format!("Failed to flush producer: {e}")))?;
            tracing::info!(brokers = %self.brokers, "Producer flushed");
            Ok(())
        })
    }
}

/// Send `item` to the subscriber and wait until it is acknowledged.
///
/// Returns `false` if the subscriber dropped the stream first.
async fn hand_off(tx: &mpsc::Sender<Handoff>, item: Result<Message, EventBusError>) -> bool {
    let (ack, acked) = oneshot::channel();
    if tx.send((item, Some(ack))).await.is_err() {
        return false;
    }
    acked.await.is_ok()
}

/// Stream over hand-offs that acknowledges each item once the next one is
/// requested.
fn acknowledging_stream(rx: mpsc::Receiver<Handoff>) -> MessageStream {
    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some((item, ack)) = rx.recv().await {
            yield item;
            if let Some(ack) = ack {
                // The consumer task only goes away together with the receiver.
                let _ = ack.send(());
            }
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaEventBus::builder().build();
        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }

    fn message(payload: &str) -> Message {
        Message {
            topic: "order-received".to_string(),
            key: None,
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_flushes_off_the_runtime_thread() {
        // The producer connects lazily, so no broker is needed.
        let bus = RedpandaEventBus::new("localhost:1").unwrap();
        let ticker = tokio::spawn(async { tokio::task::yield_now().await });

        bus.close().await.unwrap();
        assert!(ticker.await.is_ok());
    }

    #[tokio::test]
    async fn hand_off_waits_for_the_next_poll() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(1);
        let mut stream = acknowledging_stream(rx);
        let handed = tokio::spawn(async move { hand_off(&tx, Ok(message("a"))).await });

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload, b"a");

        // Still being handled: nothing may be committed yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handed.is_finished());

        // Asking for the next item acknowledges the first; the sender is then
        // gone, so the stream ends.
        assert!(stream.next().await.is_none());
        assert!(handed.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_stream_leaves_the_message_unacknowledged() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(1);
        let mut stream = acknowledging_stream(rx);
        let handed = tokio::spawn(async move { hand_off(&tx, Ok(message("a"))).await });

        assert!(stream.next().await.unwrap().is_ok());
        drop(stream);

        assert!(!handed.await.unwrap());
    }

    #[tokio::test]
    async fn read_errors_are_not_held_for_acknowledgement() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(1);
        let mut stream = acknowledging_stream(rx);
        tx.send((Err(EventBusError::TransportError("down".to_string())), None))
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(
            stream.next().await,
            Some(Err(EventBusError::TransportError(_)))
        ));
        assert!(stream.next().await.is_none());
    }
}
