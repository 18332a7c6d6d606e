//! Error types for stage processing.

use fulfillment_core::event::EventError;
use fulfillment_runtime::PublishError;
use thiserror::Error;

/// Why a stage could not process a message.
///
/// Every variant is terminal for the message it was raised for: the consume
/// loop logs it and moves on to the next read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The envelope or its payload could not be decoded.
    #[error("Failed to decode message: {0}")]
    Decode(#[from] EventError),

    /// The dedup key was already seen; an error event was published.
    #[error("{message}")]
    Duplicate {
        /// The dedup key that was seen before
        key: String,
        /// The message carried on the error event
        message: String,
    },

    /// A forward publish failed; an error event was published instead.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Reporting a failure to the error topic failed as well.
    #[error("{failure}; publishing the error event also failed: {source}")]
    EscalationFailed {
        /// The failure that was being reported
        failure: String,
        /// Why the error event could not be published
        #[source]
        source: PublishError,
    },

    /// The envelope timestamp is not a valid RFC 3339 date-time.
    #[error("Invalid timestamp on event {event_id}: {source}")]
    InvalidTimestamp {
        /// Id of the offending event
        event_id: String,
        /// Parser failure
        #[source]
        source: EventError,
    },

    /// An order submitted to intake violates an order invariant.
    #[error("Invalid order: {0}")]
    InvalidOrder(EventError),
}

impl StageError {
    /// Whether the message was rejected as a duplicate.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}
