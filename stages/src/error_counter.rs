//! Error counting: one `order_error_total{order_id}` increment per error event.
//!
//! Error events are deduplicated on their event id, so a redelivered error
//! event is not counted twice. Distinct error events about the same order are
//! each counted. Replays are expected here and are not reported back to the
//! error topic.

use crate::error::StageError;
use crate::protocol::decode_event;
use fulfillment_core::event::EventName;
use fulfillment_core::event_bus::Message;
use fulfillment_core::observability::MetricsSink;
use fulfillment_core::order::Order;
use fulfillment_core::store::CorrelationStore;
use fulfillment_runtime::{Disposition, HandlerFuture, MessageHandler};
use std::sync::Arc;

/// Counts error events per order.
pub struct ErrorCounterStage {
    seen: CorrelationStore<()>,
    metrics: Arc<dyn MetricsSink>,
}

impl ErrorCounterStage {
    /// Stage name in logs and metrics.
    pub const NAME: &'static str = "error-counter";

    /// Count into `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            seen: CorrelationStore::new(),
            metrics,
        }
    }

    /// Process one delivered message.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Decode`] if the envelope or the order in its body
    /// cannot be decoded.
    pub async fn process(&self, message: &Message) -> Result<Disposition, StageError> {
        let event = decode_event(message)?;
        if !event.is(EventName::Error) {
            tracing::debug!(event_name = %event.event_name, "Not an Error event, skipping");
            return Ok(Disposition::Skipped);
        }

        // Notification bodies carry the order fields flattened, so they decode too.
        let order = Order::decode(event.event_body.as_bytes())?;
        if !self.seen.put_if_absent(event.event_id.clone(), ()) {
            tracing::debug!(event_id = %event.event_id, "Error event already counted");
            return Ok(Disposition::Skipped);
        }
        self.metrics.record_store_size(Self::NAME, self.seen.len());

        self.metrics.increment_error(&order.order_id);
        tracing::info!(
            order_id = %order.order_id,
            error_message = event.error_message.as_deref().unwrap_or_default(),
            "Counted error"
        );
        Ok(Disposition::Recorded)
    }
}

impl MessageHandler for ErrorCounterStage {
    type Error = StageError;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a, Self::Error> {
        Box::pin(self.process(message))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use fulfillment_core::event::Event;
    use fulfillment_core::order::{Notification, NotificationType};
    use fulfillment_testing::{RecordingSink, helpers};

    fn message(event: &Event) -> Message {
        Message {
            topic: "errors".to_string(),
            key: None,
            payload: event.encode().unwrap(),
        }
    }

    fn error_for(order_id: &str) -> Event {
        helpers::order(order_id)
            .to_event(EventName::OrderReceived)
            .unwrap()
            .to_error(format!("Order {order_id} is a duplicate"))
    }

    #[tokio::test]
    async fn distinct_errors_for_one_order_are_all_counted() {
        let sink = Arc::new(RecordingSink::new());
        let stage = ErrorCounterStage::new(sink.clone());

        stage.process(&message(&error_for("A1"))).await.unwrap();
        stage.process(&message(&error_for("A1"))).await.unwrap();
        stage.process(&message(&error_for("B2"))).await.unwrap();

        assert_eq!(sink.error_count("A1"), 2);
        assert_eq!(sink.error_count("B2"), 1);
    }

    #[tokio::test]
    async fn redelivered_error_event_is_counted_once() {
        let sink = Arc::new(RecordingSink::new());
        let stage = ErrorCounterStage::new(sink.clone());
        let error = error_for("A1");

        assert_eq!(
            stage.process(&message(&error)).await.unwrap(),
            Disposition::Recorded
        );
        assert_eq!(
            stage.process(&message(&error)).await.unwrap(),
            Disposition::Skipped
        );
        assert_eq!(sink.errors(), vec!["A1"]);
    }

    #[tokio::test]
    async fn notification_errors_resolve_the_order() {
        let sink = Arc::new(RecordingSink::new());
        let stage = ErrorCounterStage::new(sink.clone());
        let error = Notification::new(NotificationType::OrderFulfilled, helpers::order("C3"))
            .to_event()
            .unwrap()
            .to_error("Notification OrderFulfilled:C3 is a duplicate");

        stage.process(&message(&error)).await.unwrap();

        assert_eq!(sink.error_count("C3"), 1);
    }

    #[tokio::test]
    async fn non_error_events_are_ignored() {
        let sink = Arc::new(RecordingSink::new());
        let stage = ErrorCounterStage::new(sink.clone());
        let event = helpers::order("A1").to_event(EventName::OrderConfirmed).unwrap();

        assert_eq!(
            stage.process(&message(&event)).await.unwrap(),
            Disposition::Skipped
        );
        assert!(sink.errors().is_empty());
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let sink = Arc::new(RecordingSink::new());
        let stage = ErrorCounterStage::new(sink.clone());
        let error = Event::new(EventName::OrderReceived, "not an order").to_error("boom");

        let err = stage.process(&message(&error)).await.unwrap_err();

        assert!(matches!(err, StageError::Decode(_)));
        assert!(sink.errors().is_empty());
    }
}
