//! The event envelope that every stage publishes and consumes.
//!
//! An [`Event`] wraps a business payload (an [`Order`](crate::order::Order) or a
//! [`Notification`](crate::order::Notification)) in a stable JSON record:
//!
//! ```json
//! {
//!   "eventId": "6f1c0e1a-...",
//!   "eventName": "OrderReceived",
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "eventBody": "{\"orderId\":\"A1\", ...}",
//!   "errorMessage": "Order A1 is a duplicate"
//! }
//! ```
//!
//! Field names are part of the cross-service contract. `eventBody` is itself a
//! serialized record and stays opaque to the envelope; consumers re-decode it
//! according to `eventName`.
//!
//! # Example
//!
//! ```
//! use fulfillment_core::event::{Event, EventName};
//!
//! let event = Event::new(EventName::OrderReceived, r#"{"orderId":"A1"}"#);
//! let bytes = event.encode().unwrap();
//! let decoded = Event::decode(&bytes).unwrap();
//!
//! assert_eq!(decoded, event);
//! assert!(decoded.is(EventName::OrderReceived));
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error types for encoding and decoding domain records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize a record to bytes.
    #[error("Failed to serialize {record}: {reason}")]
    SerializationError {
        /// The record being serialized (`event`, `order`, `notification`)
        record: &'static str,
        /// The underlying serializer message
        reason: String,
    },

    /// Failed to deserialize a record from bytes.
    #[error("Failed to deserialize {record}: {reason}")]
    DeserializationError {
        /// The record being deserialized
        record: &'static str,
        /// The underlying deserializer message
        reason: String,
    },

    /// The record decoded but violates a schema invariant.
    #[error("Invalid {record}: {reason}")]
    InvalidPayload {
        /// The record that failed validation
        record: &'static str,
        /// Which invariant was violated
        reason: String,
    },

    /// The envelope timestamp is not an RFC 3339 date-time.
    #[error("Invalid timestamp '{timestamp}': {reason}")]
    InvalidTimestamp {
        /// The raw timestamp text
        timestamp: String,
        /// The parser message
        reason: String,
    },

    /// An event name outside the closed set of stage discriminators.
    #[error("Unknown event name: {0}")]
    UnknownEventName(String),
}

/// Discriminator identifying the payload type and pipeline stage of an [`Event`].
///
/// The string mapping is an exhaustive match, so adding a variant without a wire
/// name does not compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// An order entered the pipeline (intake → inventory, time-to-ship).
    OrderReceived,
    /// Inventory accepted the order (inventory → warehouse).
    OrderConfirmed,
    /// The warehouse picked and packed the order (warehouse → time-to-ship).
    OrderPickedPacked,
    /// A customer notification (warehouse → notification).
    Notification,
    /// A processing failure reported on the error topic.
    Error,
}

impl EventName {
    /// All event names, in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::OrderReceived,
        Self::OrderConfirmed,
        Self::OrderPickedPacked,
        Self::Notification,
        Self::Error,
    ];

    /// The wire name carried in `eventName`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderReceived => "OrderReceived",
            Self::OrderConfirmed => "OrderConfirmed",
            Self::OrderPickedPacked => "OrderPickedPacked",
            Self::Notification => "Notification",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventName(s.to_string()))
    }
}

/// The wire envelope for everything flowing through the broker.
///
/// `event_name` stays a plain string on the wire so that traffic from newer
/// producers still decodes; stages compare it against an [`EventName`] with
/// [`Event::is`] and skip what they do not handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Globally unique identifier, also the broker message key.
    pub event_id: String,
    /// Payload discriminator, see [`EventName`].
    pub event_name: String,
    /// Creation time, RFC 3339 in UTC.
    pub timestamp: String,
    /// Serialized payload, decoded according to `event_name`.
    pub event_body: String,
    /// Set only on events published to signal a processing failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Event {
    /// Create an event with a fresh identifier stamped with the current time.
    #[must_use]
    pub fn new(name: EventName, body: impl Into<String>) -> Self {
        Self::at(name, body, Utc::now())
    }

    /// Create an event with a fresh identifier stamped with `time`.
    #[must_use]
    pub fn at(name: EventName, body: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_name: name.as_str().to_string(),
            timestamp: format_timestamp(time),
            event_body: body.into(),
            error_message: None,
        }
    }

    /// The same event stamped with `time` instead of its creation time.
    #[must_use]
    pub fn stamped(mut self, time: DateTime<Utc>) -> Self {
        self.timestamp = format_timestamp(time);
        self
    }

    /// Build the error event reporting a failure while processing `self`.
    ///
    /// The error event keeps the id, timestamp and body of `self` and takes
    /// the `Error` name, so every redelivery of one failing message reports
    /// under the same id and error consumers can still resolve the order.
    /// `self` is left untouched.
    #[must_use]
    pub fn to_error(&self, message: impl Into<String>) -> Self {
        Self {
            event_name: EventName::Error.as_str().to_string(),
            error_message: Some(message.into()),
            ..self.clone()
        }
    }

    /// Whether this event carries the given name.
    #[must_use]
    pub fn is(&self, name: EventName) -> bool {
        self.event_name == name.as_str()
    }

    /// The parsed event name, if it is one of the known discriminators.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventName`] for any other string.
    pub fn name(&self) -> Result<EventName, EventError> {
        self.event_name.parse()
    }

    /// Parse the envelope timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidTimestamp`] if `timestamp` is not RFC 3339.
    pub fn timestamp_utc(&self) -> Result<DateTime<Utc>, EventError> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| EventError::InvalidTimestamp {
                timestamp: self.timestamp.clone(),
                reason: e.to_string(),
            })
    }

    /// Serialize the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError {
            record: "event",
            reason: e.to_string(),
        })
    }

    /// Decode an envelope from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] on malformed input or a
    /// missing required field. Callers must not retry the same bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError {
            record: "event",
            reason: e.to_string(),
        })
    }
}

/// Format an instant the way envelopes carry it (`2025-01-01T00:00:00Z`).
#[must_use]
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
