//! Order intake: the entry point of the pipeline.
//!
//! Validates a submitted order and publishes it as `OrderReceived`. Intake
//! claims the order id before publishing, so resubmitting an accepted order is
//! reported as a duplicate. A failed publish releases the claim again: the
//! caller was told the order was not accepted and may retry.

use crate::error::StageError;
use crate::protocol::ErrorReporter;
use fulfillment_core::environment::{Clock, SystemClock};
use fulfillment_core::event::{Event, EventName};
use fulfillment_core::observability::MetricsSink;
use fulfillment_core::order::Order;
use fulfillment_core::store::CorrelationStore;
use fulfillment_runtime::Producer;
use std::sync::Arc;

/// Accepts orders into the pipeline.
pub struct OrderIntake {
    seen: CorrelationStore<()>,
    received: Producer,
    errors: ErrorReporter,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl OrderIntake {
    /// Stage name in logs and metrics.
    pub const NAME: &'static str = "intake";

    /// Publish accepted orders to `received`; report failures to `errors`.
    #[must_use]
    pub fn new(received: Producer, errors: Producer, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            seen: CorrelationStore::new(),
            received,
            errors: ErrorReporter::new(Self::NAME, errors),
            metrics,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp published events with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate `order` and publish it as `OrderReceived`.
    ///
    /// Returns the published event.
    ///
    /// # Errors
    ///
    /// - [`StageError::InvalidOrder`] if the order fails validation
    /// - [`StageError::Duplicate`] if the order id was already accepted
    /// - [`StageError::Publish`] or [`StageError::EscalationFailed`] if the
    ///   event could not be published
    pub async fn submit(&self, order: &Order) -> Result<Event, StageError> {
        order.validate().map_err(StageError::InvalidOrder)?;

        let event = Event::at(EventName::OrderReceived, order.to_body()?, self.clock.now());
        if !self.seen.put_if_absent(order.order_id.clone(), ()) {
            let message = format!("Order {} is a duplicate", order.order_id);
            return Err(self.errors.duplicate(&event, &order.order_id, message).await);
        }

        if let Err(e) = self.errors.forward(&self.received, &event, &event).await {
            self.seen.delete(&order.order_id);
            return Err(e);
        }
        self.metrics.record_store_size(Self::NAME, self.seen.len());

        tracing::info!(order_id = %order.order_id, event_id = %event.event_id, "Order received");
        Ok(event)
    }
}
