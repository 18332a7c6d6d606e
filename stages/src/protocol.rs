//! Steps shared by every consuming stage.
//!
//! Each stage runs the same sequence on a delivered message:
//!
//! 1. decode the envelope ([`decode_event`]); failure is terminal
//! 2. skip events of other types
//! 3. decode the stage payload from `eventBody`
//! 4. derive the dedup key and claim it in the stage's store
//! 5. on a duplicate, publish an error event and fail the message
//!    ([`ErrorReporter::duplicate`])
//! 6. perform the forward action ([`ErrorReporter::forward`])
//! 7. on a forward publish failure, publish one error event describing it;
//!    if that fails too, log and give up
//!
//! Error events are only ever published through [`ErrorReporter`], which
//! never reports its own failures to the error topic, so a broken error
//! topic cannot cause a publish loop.

use crate::error::StageError;
use fulfillment_core::event::Event;
use fulfillment_core::event_bus::Message;
use fulfillment_runtime::{Producer, PublishError};

/// Decode the envelope of a delivered message.
///
/// # Errors
///
/// Returns [`StageError::Decode`] on malformed bytes.
pub fn decode_event(message: &Message) -> Result<Event, StageError> {
    Ok(Event::decode(&message.payload)?)
}

/// Publishes error events for one stage.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    stage: &'static str,
    errors: Producer,
}

impl ErrorReporter {
    /// Report failures of `stage` to the topic of `errors`.
    #[must_use]
    pub const fn new(stage: &'static str, errors: Producer) -> Self {
        Self { stage, errors }
    }

    /// Report `key` of `event` as a duplicate.
    ///
    /// Returns the error to fail the message with: [`StageError::Duplicate`],
    /// or [`StageError::EscalationFailed`] if the report could not be published.
    pub async fn duplicate(&self, event: &Event, key: &str, message: String) -> StageError {
        tracing::warn!(stage = self.stage, key, event_id = %event.event_id, "{message}");

        match self.report(event, &message).await {
            Ok(()) => StageError::Duplicate {
                key: key.to_string(),
                message,
            },
            Err(source) => self.escalation_failed(message, source),
        }
    }

    /// Publish `next` through `producer`, reporting a failure against `source`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Publish`] if `next` was not published and the
    /// failure was reported, or [`StageError::EscalationFailed`] if the report
    /// could not be published either.
    pub async fn forward(
        &self,
        producer: &Producer,
        source: &Event,
        next: &Event,
    ) -> Result<(), StageError> {
        let Err(failure) = producer.publish(next).await else {
            return Ok(());
        };

        tracing::error!(stage = self.stage, error = %failure, "Forward publish failed");
        let description = failure.to_string();
        match self.report(source, &description).await {
            Ok(()) => Err(StageError::Publish(failure)),
            Err(reason) => Err(self.escalation_failed(description, reason)),
        }
    }

    async fn report(&self, event: &Event, message: &str) -> Result<(), PublishError> {
        let error_event = event.to_error(message);
        self.errors.publish(&error_event).await
    }

    fn escalation_failed(&self, failure: String, source: PublishError) -> StageError {
        tracing::error!(
            stage = self.stage,
            failure = %failure,
            error = %source,
            "Failed to publish error event; giving up"
        );
        StageError::EscalationFailed { failure, source }
    }
}
