//! Notification dispatch.
//!
//! Consumes `Notification` events and hands each one to a [`Dispatcher`]. The
//! same order may legitimately produce one notification per kind, so the
//! dedup key is `kind:orderId`.

use crate::error::StageError;
use crate::protocol::{ErrorReporter, decode_event};
use fulfillment_core::event::EventName;
use fulfillment_core::event_bus::Message;
use fulfillment_core::observability::MetricsSink;
use fulfillment_core::order::Notification;
use fulfillment_core::store::CorrelationStore;
use fulfillment_runtime::{Disposition, HandlerFuture, MessageHandler, Producer};
use std::sync::Arc;

/// Delivers a notification to the customer.
pub trait Dispatcher: Send + Sync {
    /// Send `notification`.
    fn dispatch(&self, notification: &Notification);
}

/// Dispatcher that writes one structured log record per notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn dispatch(&self, notification: &Notification) {
        tracing::info!(
            kind = %notification.kind,
            order_id = %notification.order.order_id,
            customer_id = %notification.order.customer_id,
            total_amount = notification.order.total_amount,
            "Notification sent"
        );
    }
}

/// Dispatches each notification once.
pub struct NotificationStage {
    seen: CorrelationStore<()>,
    dispatcher: Arc<dyn Dispatcher>,
    errors: ErrorReporter,
    metrics: Arc<dyn MetricsSink>,
}

impl NotificationStage {
    /// Stage name in logs and metrics.
    pub const NAME: &'static str = "notification";

    /// Dispatch through `dispatcher`; report duplicates to `errors`.
    #[must_use]
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        errors: Producer,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            seen: CorrelationStore::new(),
            dispatcher,
            errors: ErrorReporter::new(Self::NAME, errors),
            metrics,
        }
    }

    /// Process one delivered message.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Decode`] for undecodable input and
    /// [`StageError::Duplicate`] for a notification already dispatched.
    pub async fn process(&self, message: &Message) -> Result<Disposition, StageError> {
        let event = decode_event(message)?;
        if !event.is(EventName::Notification) {
            tracing::debug!(event_name = %event.event_name, "Not a Notification event, skipping");
            return Ok(Disposition::Skipped);
        }

        let notification = Notification::decode(event.event_body.as_bytes())?;
        let key = notification.dedup_key();
        if !self.seen.put_if_absent(key.clone(), ()) {
            let message = format!("Notification {key} is a duplicate");
            return Err(self.errors.duplicate(&event, &key, message).await);
        }
        self.metrics.record_store_size(Self::NAME, self.seen.len());

        self.dispatcher.dispatch(&notification);
        Ok(Disposition::Recorded)
    }
}

impl MessageHandler for NotificationStage {
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
    use fulfillment_core::order::NotificationType;
    use fulfillment_testing::{InMemoryEventBus, RecordingSink, helpers};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<String>>);

    impl Dispatcher for Outbox {
        fn dispatch(&self, notification: &Notification) {
            self.0.lock().unwrap().push(notification.dedup_key());
        }
    }

    fn message(kind: NotificationType, order_id: &str) -> Message {
        let event = Notification::new(kind, helpers::order(order_id))
            .to_event()
            .unwrap();
        Message {
            topic: "notifications".to_string(),
            key: None,
            payload: event.encode().unwrap(),
        }
    }

    fn stage(bus: &InMemoryEventBus, outbox: Arc<Outbox>) -> (NotificationStage, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let stage = NotificationStage::new(
            outbox,
            Producer::new(Arc::new(bus.clone()), "errors"),
            sink.clone(),
        );
        (stage, sink)
    }

    #[tokio::test]
    async fn each_kind_is_dispatched_once_per_order() {
        let bus = InMemoryEventBus::new();
        let outbox = Arc::new(Outbox::default());
        let (stage, sink) = stage(&bus, outbox.clone());

        stage
            .process(&message(NotificationType::OrderFulfilled, "A1"))
            .await
            .unwrap();
        stage
            .process(&message(NotificationType::OrderShipped, "A1"))
            .await
            .unwrap();
        let err = stage
            .process(&message(NotificationType::OrderFulfilled, "A1"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Notification OrderFulfilled:A1 is a duplicate"
        );
        assert_eq!(
            *outbox.0.lock().unwrap(),
            vec!["OrderFulfilled:A1", "OrderShipped:A1"]
        );
        assert_eq!(bus.message_count("errors"), 1);
        assert_eq!(sink.store_size(NotificationStage::NAME), Some(2));
    }

    #[tokio::test]
    async fn order_events_are_not_notifications() {
        let bus = InMemoryEventBus::new();
        let (stage, _) = stage(&bus, Arc::new(Outbox::default()));
        let event = helpers::order("A1")
            .to_event(EventName::OrderConfirmed)
            .unwrap();
        let message = Message {
            topic: "notifications".to_string(),
            key: None,
            payload: event.encode().unwrap(),
        };

        assert_eq!(stage.process(&message).await.unwrap(), Disposition::Skipped);
    }
}
