//! Observability sink the stages report into.
//!
//! The sink is constructed once at startup and handed to each stage that
//! records metrics. Stages depend only on this trait; exporting (Prometheus
//! text over HTTP) lives with the implementation.

/// Counters and histograms recorded by the pipeline stages.
pub trait MetricsSink: Send + Sync {
    /// Count one error event observed for `order_id`.
    fn increment_error(&self, order_id: &str);

    /// Record the time between an order being received and picked & packed.
    fn observe_time_to_ship(&self, seconds: f64);

    /// Report the number of entries held in a stage's correlation store.
    fn record_store_size(&self, _stage: &'static str, _entries: usize) {}
}
