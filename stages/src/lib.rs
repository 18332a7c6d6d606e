//! # Fulfillment Stages
//!
//! The processing stages of the order-fulfillment pipeline and the process
//! shell that runs one of them.
//!
//! ```text
//! intake ──OrderReceived──▶ inventory ──OrderConfirmed──▶ warehouse ──Notification──▶ notification
//!    │                                                        │
//!    └──────────────OrderReceived──────▶ time-to-ship ◀──OrderPickedPacked
//!
//! any stage ──Error──▶ error-counter
//! ```
//!
//! Each consuming stage implements [`MessageHandler`](fulfillment_runtime::MessageHandler)
//! and follows the shared protocol in [`protocol`]: skip foreign event types,
//! claim a dedup key, forward, and report failures to the error topic.

/// Administrative HTTP endpoints
pub mod admin;

/// Environment-based configuration
pub mod config;

/// Stage error types
pub mod error;

/// Error events counted per order
pub mod error_counter;

/// Order submission
pub mod intake;

/// `OrderReceived` → `OrderConfirmed`
pub mod inventory;

/// Notification dispatch
pub mod notification;

/// Time-to-ship measurement
pub mod order_time;

/// Per-message steps shared by the consuming stages
pub mod protocol;

/// Stage wiring and lifecycle
pub mod runner;

/// `OrderConfirmed` → `Notification` + `OrderPickedPacked`
pub mod warehouse;

pub use config::{Config, ConfigError, Stage, StageConfig};
pub use error::StageError;
pub use error_counter::ErrorCounterStage;
pub use intake::OrderIntake;
pub use inventory::InventoryStage;
pub use notification::{Dispatcher, LogDispatcher, NotificationStage};
pub use order_time::TimeToShipStage;
pub use runner::StageRuntime;
pub use warehouse::{WarehouseOutputs, WarehouseStage};
