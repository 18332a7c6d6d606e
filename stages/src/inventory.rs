//! Inventory confirmation: `OrderReceived` → `OrderConfirmed`.
//!
//! Every order id is confirmed at most once. A repeated id is reported to the
//! error topic as a duplicate and nothing is forwarded.

use crate::error::StageError;
use crate::protocol::{ErrorReporter, decode_event};
use fulfillment_core::environment::{Clock, SystemClock};
use fulfillment_core::event::{Event, EventName};
use fulfillment_core::event_bus::Message;
use fulfillment_core::observability::MetricsSink;
use fulfillment_core::order::Order;
use fulfillment_core::store::CorrelationStore;
use fulfillment_runtime::{Disposition, HandlerFuture, MessageHandler, Producer};
use std::sync::Arc;

/// Confirms received orders.
pub struct InventoryStage {
    seen: CorrelationStore<()>,
    confirmed: Producer,
    errors: ErrorReporter,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl InventoryStage {
    /// Stage name in logs and metrics.
    pub const NAME: &'static str = "inventory";

    /// Forward to `confirmed`; report failures to `errors`.
    #[must_use]
    pub fn new(confirmed: Producer, errors: Producer, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            seen: CorrelationStore::new(),
            confirmed,
            errors: ErrorReporter::new(Self::NAME, errors),
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

    /// Whether `order_id` was already confirmed by this process.
    #[must_use]
    pub fn has_seen(&self, order_id: &str) -> bool {
        self.seen.exists(order_id)
    }

    /// Process one delivered message.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Decode`] for undecodable input,
    /// [`StageError::Duplicate`] for an order id already confirmed, and the
    /// publish variants if forwarding failed.
    pub async fn process(&self, message: &Message) -> Result<Disposition, StageError> {
        let event = decode_event(message)?;
        if !event.is(EventName::OrderReceived) {
            tracing::debug!(event_name = %event.event_name, "Not an OrderReceived event, skipping");
            return Ok(Disposition::Skipped);
        }

        let order = Order::decode(event.event_body.as_bytes())?;
        if !self.seen.put_if_absent(order.order_id.clone(), ()) {
            let message = format!("Order {} is a duplicate", order.order_id);
            return Err(self.errors.duplicate(&event, &order.order_id, message).await);
        }
        self.metrics.record_store_size(Self::NAME, self.seen.len());

        let confirmed = Event::at(
            EventName::OrderConfirmed,
            event.event_body.clone(),
            self.clock.now(),
        );
        self.errors
            .forward(&self.confirmed, &event, &confirmed)
            .await?;

        tracing::info!(order_id = %order.order_id, "Order confirmed");
        Ok(Disposition::Forwarded)
    }
}

impl MessageHandler for InventoryStage {
    type Error = StageError;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a, Self::Error> {
        Box::pin(self.process(message))
    }
}
