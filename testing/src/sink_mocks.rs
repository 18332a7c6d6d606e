//! Recording [`MetricsSink`] for asserting on what stages observed.

use fulfillment_core::observability::MetricsSink;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Recorded {
    errors: Vec<String>,
    time_to_ship: Vec<f64>,
    store_sizes: HashMap<&'static str, usize>,
}

/// [`MetricsSink`] that keeps every call in memory.
///
/// # Example
///
/// ```
/// use fulfillment_core::observability::MetricsSink;
/// use fulfillment_testing::RecordingSink;
///
/// let sink = RecordingSink::new();
/// sink.increment_error("A1");
/// sink.observe_time_to_ship(45.0);
///
/// assert_eq!(sink.error_count("A1"), 1);
/// assert_eq!(sink.time_to_ship(), vec![45.0]);
/// ```
#[derive(Default)]
pub struct RecordingSink {
    recorded: Mutex<Recorded>,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Order ids passed to `increment_error`, in call order.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.recorded().errors.clone()
    }

    /// How many errors were counted for `order_id`.
    #[must_use]
    pub fn error_count(&self, order_id: &str) -> usize {
        self.recorded()
            .errors
            .iter()
            .filter(|id| id.as_str() == order_id)
            .count()
    }

    /// Every time-to-ship observation, in seconds.
    #[must_use]
    pub fn time_to_ship(&self) -> Vec<f64> {
        self.recorded().time_to_ship.clone()
    }

    /// Last store size reported by `stage`.
    #[must_use]
    pub fn store_size(&self, stage: &str) -> Option<usize> {
        self.recorded().store_sizes.get(stage).copied()
    }
}

impl MetricsSink for RecordingSink {
    fn increment_error(&self, order_id: &str) {
        self.recorded().errors.push(order_id.to_string());
    }

    fn observe_time_to_ship(&self, seconds: f64) {
        self.recorded().time_to_ship.push(seconds);
    }

    fn record_store_size(&self, stage: &'static str, entries: usize) {
        self.recorded().store_sizes.insert(stage, entries);
    }
}

impl std::fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let recorded = self.recorded();
        f.debug_struct("RecordingSink")
            .field("errors", &recorded.errors)
            .field("time_to_ship", &recorded.time_to_ship)
            .finish_non_exhaustive()
    }
}
