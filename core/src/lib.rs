//! # Fulfillment Core
//!
//! Domain model and shared seams for the event-driven order-fulfillment
//! pipeline.
//!
//! Independent stages exchange typed events over a partitioned
//! publish/subscribe broker. Each stage decodes what it receives, drops what
//! it has already seen, and publishes derived events for the next stage.
//!
//! ## Core Concepts
//!
//! - **Event**: the wire envelope ([`event::Event`]) around every payload
//! - **Order / Notification**: the business payloads ([`order`])
//! - **Correlation store**: per-process dedup set and timestamp map ([`store`])
//! - **Event bus**: the broker seam ([`event_bus::EventBus`])
//! - **Metrics sink**: the observability seam ([`observability::MetricsSink`])
//!
//! ## Example
//!
//! ```
//! use fulfillment_core::event::EventName;
//! use fulfillment_core::order::{Order, OrderItem};
//! use fulfillment_core::store::CorrelationStore;
//! use fulfillment_core::{DateTime, Utc};
//!
//! let order = Order {
//!     order_id: "A1".to_string(),
//!     customer_id: "c-1".to_string(),
//!     order_date: Utc::now(),
//!     items: vec![OrderItem { item_id: "sku".to_string(), quantity: 1, price: 4.0 }],
//!     total_amount: 4.0,
//! };
//!
//! let event = order.to_event(EventName::OrderReceived).unwrap();
//! let seen = CorrelationStore::<()>::new();
//! assert!(seen.put_if_absent(order.order_id.clone(), ()));
//! # let _: Option<DateTime<Utc>> = event.timestamp_utc().ok();
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Event envelope and event names
pub mod event;

/// Broker seam
pub mod event_bus;

/// Observability seam
pub mod observability;

/// Order and notification payloads
pub mod order;

/// Correlation store
pub mod store;

/// Environment module - Injected dependencies
///
/// Stages read time through [`environment::Clock`] so tests can pin it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use fulfillment_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
