//! Prometheus metrics for the pipeline.
//!
//! This module provides metric collection for:
//! - Event bus publish/consume
//! - Per-stage message outcomes
//! - The order metrics stages (`order_error_total`, `order_time_to_ship_seconds`)
//! - Correlation store sizes
//!
//! The recorder is installed once per process by [`MetricsServer::start`];
//! the admin HTTP surface renders it at `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use fulfillment_runtime::metrics::{MetricsServer, PrometheusSink};
//! use fulfillment_core::observability::MetricsSink;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//!
//! PrometheusSink.increment_error("A1");
//! let text = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use fulfillment_core::observability::MetricsSink;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Name of the per-order error counter.
pub const ORDER_ERROR_TOTAL: &str = "order_error_total";

/// Name of the time-to-ship histogram.
pub const ORDER_TIME_TO_SHIP_SECONDS: &str = "order_time_to_ship_seconds";

/// Buckets for the time-to-ship histogram, from seconds up to a day.
const TIME_TO_SHIP_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 21600.0, 86400.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Process-wide Prometheus recorder.
///
/// Holds the handle used to render the text exposition format.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that has not installed its recorder yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs
    /// a warning and leaves [`Self::handle`] empty. In production, ensure this
    /// is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(ORDER_TIME_TO_SHIP_SECONDS.to_string()),
                TIME_TO_SHIP_BUCKETS,
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Order metrics
    describe_counter!(
        ORDER_ERROR_TOTAL,
        "Total number of error events observed, labeled by order"
    );
    describe_histogram!(
        ORDER_TIME_TO_SHIP_SECONDS,
        metrics::Unit::Seconds,
        "Time between an order being received and picked & packed"
    );

    // Event bus metrics
    describe_counter!(
        "event_bus_messages_published_total",
        "Total number of messages published to event bus"
    );
    describe_counter!(
        "event_bus_messages_consumed_total",
        "Total number of messages consumed from event bus"
    );
    describe_counter!(
        "event_bus_publish_errors_total",
        "Total number of publish errors"
    );
    describe_counter!(
        "event_bus_consume_errors_total",
        "Total number of consume errors"
    );
    describe_histogram!(
        "event_bus_publish_duration_seconds",
        "Time taken to publish messages"
    );

    // Stage metrics
    describe_counter!(
        "stage_messages_total",
        "Messages handled per stage, labeled by outcome"
    );
    describe_gauge!(
        "correlation_store_entries",
        "Entries currently held in a stage's correlation store"
    );
}

/// Event bus metrics recorder.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a message publish.
    pub fn record_publish(topic: &str, duration: Duration) {
        counter!("event_bus_messages_published_total", "topic" => topic.to_string()).increment(1);
        histogram!("event_bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a message consumption.
    pub fn record_consume(topic: &str) {
        counter!("event_bus_messages_consumed_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a publish error.
    pub fn record_publish_error(topic: &str) {
        counter!("event_bus_publish_errors_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a consume error.
    pub fn record_consume_error() {
        counter!("event_bus_consume_errors_total").increment(1);
    }
}

/// Stage outcome recorder.
pub struct StageMetrics;

impl StageMetrics {
    /// Record one handled message.
    pub fn record_outcome(stage: &'static str, outcome: &'static str) {
        counter!("stage_messages_total", "stage" => stage, "outcome" => outcome).increment(1);
    }
}

/// [`MetricsSink`] backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn increment_error(&self, order_id: &str) {
        counter!(ORDER_ERROR_TOTAL, "order" => order_id.to_string()).increment(1);
    }

    fn observe_time_to_ship(&self, seconds: f64) {
        histogram!(ORDER_TIME_TO_SHIP_SECONDS).record(seconds);
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_store_size(&self, stage: &'static str, entries: usize) {
        gauge!("correlation_store_entries", "stage" => stage).set(entries as f64);
    }
}
