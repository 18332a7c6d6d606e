//! # Fulfillment Runtime
//!
//! Runtime pieces shared by every pipeline stage.
//!
//! ## Core Components
//!
//! - **Producer**: publishes events to one topic through an [`EventBus`]
//! - **Consumer**: the read loop that feeds messages to a stage handler until shutdown
//! - **Metrics**: Prometheus recorder and the [`MetricsSink`] the stages report into
//! - **Retry**: bounded exponential backoff between failed reads
//!
//! ## Example
//!
//! ```ignore
//! use fulfillment_runtime::{Consumer, Producer};
//!
//! let producer = Producer::new(bus.clone(), "order-confirmed");
//! let consumer = Consumer::new(bus, "order-received", "inventory-group");
//!
//! let summary = consumer.consume(shutdown_rx, &inventory_handler).await;
//! producer.close().await?;
//! ```
//!
//! [`EventBus`]: fulfillment_core::event_bus::EventBus
//! [`MetricsSink`]: fulfillment_core::observability::MetricsSink

/// Stage read loop with shutdown and backoff
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

/// Topic-bound event publisher
pub mod producer;

/// Retry logic with exponential backoff
pub mod retry;

pub use consumer::{
    ConsumeSummary, Consumer, Disposition, HandlerFuture, MessageHandler, MessageOutcome,
};
pub use metrics::{MetricsServer, PrometheusSink};
pub use producer::{Producer, PublishError};
pub use retry::RetryPolicy;
