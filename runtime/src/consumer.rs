//! Blocking read loop that feeds broker messages to a stage handler.
//!
//! [`Consumer::consume`] subscribes to its topics and hands every delivered
//! message to a [`MessageHandler`], one at a time: the next read starts only
//! after the previous message was fully handled. A handler error is terminal
//! for that message only. It is logged, reported as a [`MessageOutcome`], and
//! the loop moves on; nothing is retried or dead-lettered here.
//!
//! Transport errors on read are logged and the loop reads again after a
//! bounded exponential backoff ([`RetryPolicy`]), which resets on the next
//! successful read. A subscription that ends is re-established the same way.
//!
//! The loop exits when the process-wide shutdown flag (a
//! `tokio::sync::watch` channel) becomes `true`. A read in flight is abandoned
//! at that point; a message already being handled is finished first.
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let consumer = Consumer::new(bus, "order-received", "inventory-group");
//!
//! tokio::spawn(async move { consumer.consume(shutdown_rx, &handler).await });
//!
//! // Later, from a signal handler:
//! shutdown_tx.send(true).ok();
//! ```

use crate::metrics::{EventBusMetrics, StageMetrics};
use crate::retry::RetryPolicy;
use fulfillment_core::event_bus::{EventBus, Message, MessageStream};
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// What a handler did with a message it accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Published one or more next-stage events.
    Forwarded,
    /// Recorded local state or a metric without publishing.
    Recorded,
    /// Intentionally did nothing (other event type, already counted, unpaired).
    Skipped,
}

impl Disposition {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::Recorded => "recorded",
            Self::Skipped => "skipped",
        }
    }
}

/// Future returned by [`MessageHandler::handle`].
pub type HandlerFuture<'a, E> = Pin<Box<dyn Future<Output = Result<Disposition, E>> + Send + 'a>>;

/// Per-message processing logic of a stage.
pub trait MessageHandler: Send + Sync {
    /// Error returned for a message that could not be processed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stage name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Process one delivered message.
    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a, Self::Error>;
}

/// The result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    /// Stage that handled the message
    pub stage: &'static str,
    /// Topic the message came from
    pub topic: String,
    /// Message key (normally the event id)
    pub key: Option<String>,
    /// What the handler did, or the rendered error
    pub result: Result<Disposition, String>,
}

impl MessageOutcome {
    /// Label used in logs and metrics (`forwarded`, `recorded`, `skipped`, `failed`).
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match &self.result {
            Ok(disposition) => disposition.as_str(),
            Err(_) => "failed",
        }
    }
}

/// Counters returned when a consume loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Messages forwarded or recorded
    pub processed: u64,
    /// Messages accepted but intentionally ignored
    pub skipped: u64,
    /// Messages whose handler returned an error
    pub failed: u64,
    /// Transport errors on subscribe or read
    pub read_errors: u64,
}

impl ConsumeSummary {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome.result {
            Ok(Disposition::Forwarded | Disposition::Recorded) => self.processed += 1,
            Ok(Disposition::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Reads one topic set as a member of one consumer group.
pub struct Consumer {
    bus: Arc<dyn EventBus>,
    topics: Vec<String>,
    group_id: String,
    backoff: RetryPolicy,
    outcomes: Option<mpsc::UnboundedSender<MessageOutcome>>,
}

impl Consumer {
    /// Create a consumer of `topic` in consumer group `group_id`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bus,
            topics: vec![topic.into()],
            group_id: group_id.into(),
            backoff: RetryPolicy::default(),
            outcomes: None,
        }
    }

    /// Use `policy` between failed reads instead of the default.
    #[must_use]
    pub fn with_backoff(mut self, policy: RetryPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Send every [`MessageOutcome`] to `sender` in addition to logging it.
    #[must_use]
    pub fn with_outcomes(mut self, sender: mpsc::UnboundedSender<MessageOutcome>) -> Self {
        self.outcomes = Some(sender);
        self
    }

    /// The consumer group this consumer joins.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Run the read loop until `shutdown` becomes `true`.
    ///
    /// A dropped shutdown sender is treated as a shutdown request.
    #[allow(clippy::cognitive_complexity)]
    pub async fn consume<H>(&self, mut shutdown: watch::Receiver<bool>, handler: &H) -> ConsumeSummary
    where
        H: MessageHandler + ?Sized,
    {
        let stage = handler.name();
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        let mut summary = ConsumeSummary::default();
        let mut failures = 0_usize;

        tracing::info!(stage, topics = ?topics, group_id = %self.group_id, "Starting consumer");

        'subscription: loop {
            let subscribed = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break 'subscription,
                result = self.bus.subscribe(&topics, &self.group_id) => result,
            };

            let mut stream: MessageStream = match subscribed {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(stage, error = %e, attempt = failures, "Failed to subscribe");
                    summary.read_errors += 1;
                    if self.back_off(failures, &mut shutdown).await {
                        break 'subscription;
                    }
                    failures += 1;
                    continue 'subscription;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    () = shutdown_requested(&mut shutdown) => break 'subscription,
                    item = stream.next() => item,
                };

                match next {
                    Some(Ok(message)) => {
                        failures = 0;
                        EventBusMetrics::record_consume(&message.topic);
                        let outcome = dispatch(handler, &message).await;
                        summary.record(&outcome);
                        if let Some(sender) = &self.outcomes {
                            // A closed receiver only means nobody is watching.
                            let _ = sender.send(outcome);
                        }
                    }
                    Some(Err(e)) => {
                        EventBusMetrics::record_consume_error();
                        summary.read_errors += 1;
                        tracing::error!(stage, error = %e, attempt = failures, "Error reading message");
                        if self.back_off(failures, &mut shutdown).await {
                            break 'subscription;
                        }
                        failures += 1;
                    }
                    None => {
                        tracing::warn!(stage, "Message stream ended, resubscribing");
                        if self.back_off(failures, &mut shutdown).await {
                            break 'subscription;
                        }
                        failures += 1;
                        continue 'subscription;
                    }
                }
            }
        }

        tracing::info!(
            stage,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            read_errors = summary.read_errors,
            "Consumer stopped"
        );
        summary
    }

    /// Release the consumer. Closes the outcome channel, if any.
    pub fn close(self) {
        tracing::debug!(topics = ?self.topics, group_id = %self.group_id, "Consumer closed");
    }

    /// Sleep for the backoff delay of `attempt`; returns `true` if shutdown
    /// was requested meanwhile.
    async fn back_off(&self, attempt: usize, shutdown: &mut watch::Receiver<bool>) -> bool {
        let delay = self.backoff.delay_for_attempt(attempt);
        tokio::select! {
            biased;
            () = shutdown_requested(shutdown) => true,
            () = tokio::time::sleep(delay) => false,
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("topics", &self.topics)
            .field("group_id", &self.group_id)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Run the handler on one message and log the outcome as one structured record.
async fn dispatch<H: MessageHandler + ?Sized>(handler: &H, message: &Message) -> MessageOutcome {
    let stage = handler.name();
    let key = message.key_str();

    let result = handler.handle(message).await.map_err(|e| e.to_string());
    let outcome = MessageOutcome {
        stage,
        topic: message.topic.clone(),
        key,
        result,
    };

    StageMetrics::record_outcome(stage, outcome.label());
    match &outcome.result {
        Ok(disposition) => tracing::info!(
            stage,
            topic = %outcome.topic,
            key = outcome.key.as_deref().unwrap_or(""),
            outcome = disposition.as_str(),
            "Message handled"
        ),
        Err(error) => tracing::warn!(
            stage,
            topic = %outcome.topic,
            key = outcome.key.as_deref().unwrap_or(""),
            outcome = "failed",
            error = %error,
            "Message dropped after handler error"
        ),
    }
    outcome
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // Err means the sender was dropped, which also ends the loop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}
