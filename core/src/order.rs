//! Business payloads carried in [`Event::event_body`](crate::event::Event).
//!
//! [`Order`] is the expected pipeline input; [`Notification`] tags an order with
//! the kind of customer notification it triggers. Both serialize to JSON with
//! camelCase field names, and a notification flattens the order fields into its
//! own record next to an integer `notificationType`.

use crate::event::{Event, EventError, EventName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single line of an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Catalogue identifier of the item.
    pub item_id: String,
    /// Number of units ordered.
    pub quantity: u32,
    /// Unit price.
    pub price: f64,
}

/// An order moving through the pipeline.
///
/// `order_id` is unique for the lifetime of the system and is the correlation
/// key for idempotence and for time-to-ship measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique order identifier.
    pub order_id: String,
    /// The customer who placed the order.
    pub customer_id: String,
    /// When the order was placed.
    pub order_date: DateTime<Utc>,
    /// Ordered line items, never empty.
    pub items: Vec<OrderItem>,
    /// Order total.
    pub total_amount: f64,
}

impl Order {
    /// Decode an order from JSON bytes (typically an event body).
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] on malformed or
    /// schema-mismatched input and [`EventError::InvalidPayload`] if the order
    /// has no line items.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let order: Self =
            serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError {
                record: "order",
                reason: e.to_string(),
            })?;

        if order.items.is_empty() {
            return Err(EventError::InvalidPayload {
                record: "order",
                reason: format!("order {} has no items", order.order_id),
            });
        }

        Ok(order)
    }

    /// Check the invariants intake enforces before an order enters the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidPayload`] if the id is blank, there are no
    /// items, or any price or total is negative or not finite.
    pub fn validate(&self) -> Result<(), EventError> {
        let invalid = |reason: String| EventError::InvalidPayload {
            record: "order",
            reason,
        };

        if self.order_id.trim().is_empty() {
            return Err(invalid("orderId is empty".to_string()));
        }
        if self.items.is_empty() {
            return Err(invalid(format!("order {} has no items", self.order_id)));
        }
        if let Some(item) = self
            .items
            .iter()
            .find(|item| !item.price.is_finite() || item.price < 0.0)
        {
            return Err(invalid(format!(
                "item {} has invalid price {}",
                item.item_id, item.price
            )));
        }
        if !self.total_amount.is_finite() || self.total_amount < 0.0 {
            return Err(invalid(format!("invalid totalAmount {}", self.total_amount)));
        }
        Ok(())
    }

    /// Serialize the order to its JSON body text.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serialization fails.
    pub fn to_body(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::SerializationError {
            record: "order",
            reason: e.to_string(),
        })
    }

    /// Wrap the order in a new event with the given name.
    ///
    /// # Errors
    ///
    /// Propagates [`EventError::SerializationError`] from [`Order::to_body`].
    pub fn to_event(&self, name: EventName) -> Result<Event, EventError> {
        Ok(Event::new(name, self.to_body()?))
    }
}

/// The kind of customer notification.
///
/// Carried on the wire as its integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NotificationType {
    /// The order left the warehouse fully packed.
    OrderFulfilled,
    /// The order was handed to the carrier.
    OrderShipped,
}

impl NotificationType {
    /// Name used in dedup keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderFulfilled => "OrderFulfilled",
            Self::OrderShipped => "OrderShipped",
        }
    }

    /// The integer wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::OrderFulfilled => 0,
            Self::OrderShipped => 1,
        }
    }
}

impl From<NotificationType> for u8 {
    fn from(value: NotificationType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for NotificationType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::OrderFulfilled),
            1 => Ok(Self::OrderShipped),
            other => Err(format!("unknown notificationType {other}")),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order tagged with the notification it triggers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Which notification to send.
    #[serde(rename = "notificationType")]
    pub kind: NotificationType,
    /// The order the notification is about.
    #[serde(flatten)]
    pub order: Order,
}

impl Notification {
    /// Tag `order` with a notification kind.
    #[must_use]
    pub const fn new(kind: NotificationType, order: Order) -> Self {
        Self { kind, order }
    }

    /// Dedup key: the same order may legitimately produce several kinds.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.order.order_id)
    }

    /// Decode a notification from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] on malformed input or an
    /// unknown `notificationType` code.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError {
            record: "notification",
            reason: e.to_string(),
        })
    }

    /// Wrap the notification in a new `Notification` event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serialization fails.
    pub fn to_event(&self) -> Result<Event, EventError> {
        let body = serde_json::to_string(self).map_err(|e| EventError::SerializationError {
            record: "notification",
            reason: e.to_string(),
        })?;
        Ok(Event::new(EventName::Notification, body))
    }
}
