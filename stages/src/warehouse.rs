//! Warehouse fulfillment: `OrderConfirmed` → `Notification` + `OrderPickedPacked`.
//!
//! A confirmed order is picked and packed once. The stage tells the customer
//! (an `OrderFulfilled` notification) and announces the picked & packed order
//! for time-to-ship measurement. If the notification cannot be published the
//! picked & packed event is not sent either.

use crate::error::StageError;
use crate::protocol::{ErrorReporter, decode_event};
use fulfillment_core::environment::{Clock, SystemClock};
use fulfillment_core::event::{Event, EventName};
use fulfillment_core::event_bus::Message;
use fulfillment_core::observability::MetricsSink;
use fulfillment_core::order::{Notification, NotificationType, Order};
use fulfillment_core::store::CorrelationStore;
use fulfillment_runtime::{Disposition, HandlerFuture, MessageHandler, Producer};
use std::sync::Arc;

/// Output topics of the warehouse stage.
#[derive(Debug, Clone)]
pub struct WarehouseOutputs {
    /// Receives `Notification` events
    pub notifications: Producer,
    /// Receives `OrderPickedPacked` events
    pub picked_packed: Producer,
    /// Receives `Error` events
    pub errors: Producer,
}

/// Fulfills confirmed orders.
pub struct WarehouseStage {
    seen: CorrelationStore<()>,
    notifications: Producer,
    picked_packed: Producer,
    errors: ErrorReporter,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl WarehouseStage {
    /// Stage name in logs and metrics.
    pub const NAME: &'static str = "warehouse";

    /// Create the stage writing to `outputs`.
    #[must_use]
    pub fn new(outputs: WarehouseOutputs, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            seen: CorrelationStore::new(),
            notifications: outputs.notifications,
            picked_packed: outputs.picked_packed,
            errors: ErrorReporter::new(Self::NAME, outputs.errors),
            metrics,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp forwarded events with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Process one delivered message.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Decode`] for undecodable input,
    /// [`StageError::Duplicate`] for an order already fulfilled, and the
    /// publish variants if forwarding failed.
    pub async fn process(&self, message: &Message) -> Result<Disposition, StageError> {
        let event = decode_event(message)?;
        if !event.is(EventName::OrderConfirmed) {
            tracing::debug!(event_name = %event.event_name, "Not an OrderConfirmed event, skipping");
            return Ok(Disposition::Skipped);
        }

        let order = Order::decode(event.event_body.as_bytes())?;
        if !self.seen.put_if_absent(order.order_id.clone(), ()) {
            let message = format!("Order {} is a duplicate", order.order_id);
            return Err(self.errors.duplicate(&event, &order.order_id, message).await);
        }
        self.metrics.record_store_size(Self::NAME, self.seen.len());

        let now = self.clock.now();
        let notification = Notification::new(NotificationType::OrderFulfilled, order.clone());
        let fulfilled = notification.to_event()?.stamped(now);
        self.errors
            .forward(&self.notifications, &event, &fulfilled)
            .await?;

        let picked_packed = Event::at(
            EventName::OrderPickedPacked,
            event.event_body.clone(),
            now,
        );
        self.errors
            .forward(&self.picked_packed, &event, &picked_packed)
            .await?;

        tracing::info!(order_id = %order.order_id, "Order picked and packed");
        Ok(Disposition::Forwarded)
    }
}

impl MessageHandler for WarehouseStage {
    type Error = StageError;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a, Self::Error> {
        Box::pin(self.process(message))
    }
}
