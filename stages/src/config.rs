//! Configuration management for the pipeline stages.
//!
//! Loads configuration from environment variables with defaults matching a
//! local single-broker deployment. A `.env` file is honored when present.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// The rejected value
        value: String,
        /// Parser message
        reason: String,
    },

    /// The stage name is not one of the known stages.
    #[error("Unknown stage '{0}' (expected one of: {stages})", stages = Stage::names())]
    UnknownStage(String),
}

/// One pipeline stage; each process runs exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Accepts orders over HTTP and publishes `OrderReceived`.
    Intake,
    /// `OrderReceived` → `OrderConfirmed`.
    Inventory,
    /// `OrderConfirmed` → `Notification` + `OrderPickedPacked`.
    Warehouse,
    /// Dispatches `Notification`s.
    Notification,
    /// Counts `Error` events per order.
    ErrorCounter,
    /// Measures received → picked & packed.
    TimeToShip,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Self; 6] = [
        Self::Intake,
        Self::Inventory,
        Self::Warehouse,
        Self::Notification,
        Self::ErrorCounter,
        Self::TimeToShip,
    ];

    /// Name used on the command line, in logs and in metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Inventory => "inventory",
            Self::Warehouse => "warehouse",
            Self::Notification => "notification",
            Self::ErrorCounter => "error-counter",
            Self::TimeToShip => "time-to-ship",
        }
    }

    fn names() -> String {
        Self::ALL.map(Self::as_str).join(", ")
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownStage(s.to_string()))
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Broker and topic configuration
    pub kafka: KafkaConfig,
    /// Admin HTTP server configuration
    pub server: ServerConfig,
}

/// Broker address and topic names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub broker: String,
    /// Topic carrying `OrderReceived`
    pub order_received_topic: String,
    /// Topic carrying `OrderConfirmed`
    pub order_confirmed_topic: String,
    /// Topic carrying `OrderPickedPacked`
    pub order_picked_packed_topic: String,
    /// Topic carrying `Notification`
    pub order_notification_topic: String,
    /// Topic carrying `Error`
    pub error_topic: String,
    /// Consumer group override; defaults to `<stage>-group`
    pub group_id: Option<String>,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// What one consumer of a stage reads: `{broker, topic, groupId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    /// Broker addresses
    pub broker: String,
    /// Input topic
    pub topic: String,
    /// Consumer group
    pub group_id: String,
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if any).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal case outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            kafka: KafkaConfig {
                broker: var("KAFKA_BROKER", "localhost:29092"),
                order_received_topic: var("KAFKA_ORDER_RECEIVED", "order-received"),
                order_confirmed_topic: var("KAFKA_ORDER_CONFIRMED", "order-confirmed"),
                order_picked_packed_topic: var("KAFKA_ORDER_PICKED_PACKED", "order-picked-packed"),
                order_notification_topic: var("KAFKA_ORDER_NOTIFICATION", "order-notification"),
                error_topic: var("KAFKA_ERROR", "order-error"),
                group_id: lookup("KAFKA_GROUP_ID").filter(|g| !g.trim().is_empty()),
            },
            server: ServerConfig {
                host: var("HOST", "0.0.0.0"),
                port: parse(&lookup, "PORT", 8080)?,
                shutdown_timeout: parse(&lookup, "SHUTDOWN_TIMEOUT", 30)?,
            },
        })
    }

    /// Consumer group for `stage`.
    #[must_use]
    pub fn group_id(&self, stage: Stage) -> String {
        self.kafka
            .group_id
            .clone()
            .unwrap_or_else(|| format!("{stage}-group"))
    }

    /// One entry per consumer the stage runs: none for intake, two for
    /// time-to-ship (received and picked & packed), one otherwise.
    #[must_use]
    pub fn consumers(&self, stage: Stage) -> Vec<StageConfig> {
        let kafka = &self.kafka;
        let topics: Vec<&str> = match stage {
            Stage::Intake => vec![],
            Stage::Inventory => vec![kafka.order_received_topic.as_str()],
            Stage::Warehouse => vec![kafka.order_confirmed_topic.as_str()],
            Stage::Notification => vec![kafka.order_notification_topic.as_str()],
            Stage::ErrorCounter => vec![kafka.error_topic.as_str()],
            Stage::TimeToShip => vec![
                kafka.order_received_topic.as_str(),
                kafka.order_picked_packed_topic.as_str(),
            ],
        };

        topics
            .into_iter()
            .map(|topic| StageConfig {
                broker: kafka.broker.clone(),
                topic: topic.to_string(),
                group_id: self.group_id(stage),
            })
            .collect()
    }

    /// `host:port` for the admin server.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
