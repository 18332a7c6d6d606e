//! Time-to-ship measurement: `OrderReceived` … `OrderPickedPacked`.
//!
//! Two consumers share one correlation store. The received side remembers the
//! first `OrderReceived` timestamp per order; the picked & packed side takes
//! that entry and observes the difference in seconds. Taking the entry means
//! each order is observed at most once.
//!
//! A picked & packed event whose order was never seen as received is skipped
//! without an error event: the received side of the pair may have been
//! consumed before this process started.

use crate::error::StageError;
use crate::protocol::decode_event;
use chrono::{DateTime, Utc};
use fulfillment_core::event::{Event, EventName};
use fulfillment_core::event_bus::Message;
use fulfillment_core::observability::MetricsSink;
use fulfillment_core::order::Order;
use fulfillment_core::store::CorrelationStore;
use fulfillment_runtime::{Disposition, HandlerFuture, MessageHandler};
use std::sync::Arc;

/// Correlates received and picked & packed events per order.
#[derive(Clone)]
pub struct TimeToShipStage {
    received_at: Arc<CorrelationStore<DateTime<Utc>>>,
    metrics: Arc<dyn MetricsSink>,
}

impl TimeToShipStage {
    /// Stage name in logs and metrics.
    pub const NAME: &'static str = "time-to-ship";

    /// Observe into `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            received_at: Arc::new(CorrelationStore::new()),
            metrics,
        }
    }

    /// Handler for the `OrderReceived` topic.
    #[must_use]
    pub fn received(&self) -> ReceivedHandler {
        ReceivedHandler(self.clone())
    }

    /// Handler for the `OrderPickedPacked` topic.
    #[must_use]
    pub fn picked_packed(&self) -> PickedPackedHandler {
        PickedPackedHandler(self.clone())
    }

    /// Orders received but not yet picked & packed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.received_at.len()
    }

    /// Remember when the order of a received event arrived.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Decode`] or [`StageError::InvalidTimestamp`] for
    /// malformed input.
    pub async fn on_received(&self, message: &Message) -> Result<Disposition, StageError> {
        let event = decode_event(message)?;
        if !event.is(EventName::OrderReceived) {
            tracing::debug!(event_name = %event.event_name, "Not an OrderReceived event, skipping");
            return Ok(Disposition::Skipped);
        }

        let (order, at) = Self::order_and_time(&event)?;
        if !self.received_at.put_if_absent(order.order_id.clone(), at) {
            tracing::debug!(order_id = %order.order_id, "Receipt time already recorded");
            return Ok(Disposition::Skipped);
        }
        self.metrics
            .record_store_size(Self::NAME, self.received_at.len());

        tracing::debug!(order_id = %order.order_id, received_at = %event.timestamp, "Recorded receipt time");
        Ok(Disposition::Recorded)
    }

    /// Observe time-to-ship for the order of a picked & packed event.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Decode`] or [`StageError::InvalidTimestamp`] for
    /// malformed input.
    pub async fn on_picked_packed(&self, message: &Message) -> Result<Disposition, StageError> {
        let event = decode_event(message)?;
        if !event.is(EventName::OrderPickedPacked) {
            tracing::debug!(event_name = %event.event_name, "Not an OrderPickedPacked event, skipping");
            return Ok(Disposition::Skipped);
        }

        let (order, packed_at) = Self::order_and_time(&event)?;
        let Some(received_at) = self.received_at.take(&order.order_id) else {
            tracing::debug!(order_id = %order.order_id, "No receipt time for order, skipping");
            return Ok(Disposition::Skipped);
        };
        self.metrics
            .record_store_size(Self::NAME, self.received_at.len());

        let elapsed = packed_at - received_at;
        if elapsed < chrono::Duration::zero() {
            tracing::warn!(
                order_id = %order.order_id,
                received_at = %received_at,
                picked_packed_at = %packed_at,
                "Picked and packed before received, dropping observation"
            );
            return Ok(Disposition::Skipped);
        }

        #[allow(clippy::cast_precision_loss)]
        let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        self.metrics.observe_time_to_ship(seconds);
        tracing::info!(order_id = %order.order_id, seconds, "Observed time to ship");
        Ok(Disposition::Recorded)
    }

    fn order_and_time(event: &Event) -> Result<(Order, DateTime<Utc>), StageError> {
        let order = Order::decode(event.event_body.as_bytes())?;
        let at = event
            .timestamp_utc()
            .map_err(|source| StageError::InvalidTimestamp {
                event_id: event.event_id.clone(),
                source,
            })?;
        Ok((order, at))
    }
}

/// Consumes `OrderReceived` events for a [`TimeToShipStage`].
pub struct ReceivedHandler(TimeToShipStage);

impl MessageHandler for ReceivedHandler {
    type Error = StageError;

    fn name(&self) -> &'static str {
        "time-to-ship-received"
    }

    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a, Self::Error> {
        Box::pin(self.0.on_received(message))
    }
}

/// Consumes `OrderPickedPacked` events for a [`TimeToShipStage`].
pub struct PickedPackedHandler(TimeToShipStage);

impl MessageHandler for PickedPackedHandler {
    type Error = StageError;

    fn name(&self) -> &'static str {
        "time-to-ship-picked-packed"
    }

    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a, Self::Error> {
        Box::pin(self.0.on_picked_packed(message))
    }
}
