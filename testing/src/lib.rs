//! # Fulfillment Testing
//!
//! Testing utilities for the order-fulfillment pipeline.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: a deterministic broker with failure injection
//! - [`RecordingSink`]: a metrics sink that remembers every observation
//! - [`FixedClock`]: deterministic time
//! - Order fixtures and proptest strategies for the domain types
//!
//! ## Example
//!
//! ```ignore
//! use fulfillment_testing::{helpers, InMemoryEventBus, RecordingSink};
//!
//! #[tokio::test]
//! async fn test_duplicate_order() {
//!     let bus = InMemoryEventBus::new();
//!     let order = helpers::order("A1");
//!
//!     // publish twice, run the inventory stage, assert on bus.published(..)
//! }
//! ```

use chrono::{DateTime, Utc};
use fulfillment_core::environment::Clock;

mod bus_mocks;
mod sink_mocks;

pub use bus_mocks::InMemoryEventBus;
pub use sink_mocks::RecordingSink;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use fulfillment_testing::mocks::FixedClock;
    /// use fulfillment_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::helpers::t0())
    }
}

/// Fixtures and test setup helpers.
pub mod helpers {
    use super::{DateTime, Utc};
    use fulfillment_core::order::{Order, OrderItem};

    /// 2025-01-01 00:00:00 UTC, the reference instant of every fixture.
    #[must_use]
    pub fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// A valid one-item order with the given id.
    #[must_use]
    pub fn order(order_id: &str) -> Order {
        Order {
            order_id: order_id.to_string(),
            customer_id: "customer-1".to_string(),
            order_date: t0(),
            items: vec![OrderItem {
                item_id: "sku-1".to_string(),
                quantity: 1,
                price: 19.99,
            }],
            total_amount: 19.99,
        }
    }

    /// Install a tracing subscriber that writes through the test harness.
    ///
    /// Honors `RUST_LOG`; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use super::{DateTime, Utc};
    use fulfillment_core::event::{Event, EventName};
    use fulfillment_core::order::{Notification, NotificationType, Order, OrderItem};
    use proptest::prelude::*;

    /// Identifiers as they appear in real traffic.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9-]{1,24}"
    }

    /// Instants with second precision between 2000 and 2100.
    pub fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
        (946_684_800_i64..4_102_444_800_i64)
            .prop_filter_map("timestamp out of range", |secs| {
                DateTime::from_timestamp(secs, 0)
            })
    }

    /// Money amounts in whole cents.
    pub fn arb_amount() -> impl Strategy<Value = f64> {
        (0_u32..10_000_000).prop_map(|cents| f64::from(cents) / 100.0)
    }

    /// A single order line.
    pub fn arb_item() -> impl Strategy<Value = OrderItem> {
        (arb_id(), 1_u32..1_000, arb_amount()).prop_map(|(item_id, quantity, price)| OrderItem {
            item_id,
            quantity,
            price,
        })
    }

    /// A valid order with one to eight items.
    pub fn arb_order() -> impl Strategy<Value = Order> {
        (
            arb_id(),
            arb_id(),
            arb_instant(),
            prop::collection::vec(arb_item(), 1..8),
            arb_amount(),
        )
            .prop_map(
                |(order_id, customer_id, order_date, items, total_amount)| Order {
                    order_id,
                    customer_id,
                    order_date,
                    items,
                    total_amount,
                },
            )
    }

    /// A notification of either kind.
    pub fn arb_notification() -> impl Strategy<Value = Notification> {
        (
            prop_oneof![
                Just(NotificationType::OrderFulfilled),
                Just(NotificationType::OrderShipped)
            ],
            arb_order(),
        )
            .prop_map(|(kind, order)| Notification::new(kind, order))
    }

    /// An envelope with arbitrary body text and an optional error message.
    pub fn arb_event() -> impl Strategy<Value = Event> {
        (
            prop::sample::select(EventName::ALL.to_vec()),
            any::<String>(),
            arb_instant(),
            prop::option::of(any::<String>()),
        )
            .prop_map(|(name, body, time, error_message)| {
                let mut event = Event::at(name, body, time);
                event.error_message = error_message;
                event
            })
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
