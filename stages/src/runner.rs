//! Wires one stage to the bus and runs its consumers.

use crate::config::{Config, Stage};
use crate::error::StageError;
use crate::error_counter::ErrorCounterStage;
use crate::intake::OrderIntake;
use crate::inventory::InventoryStage;
use crate::notification::{LogDispatcher, NotificationStage};
use crate::order_time::TimeToShipStage;
use crate::warehouse::{WarehouseOutputs, WarehouseStage};
use fulfillment_core::event_bus::EventBus;
use fulfillment_core::observability::MetricsSink;
use fulfillment_runtime::{ConsumeSummary, Consumer, MessageHandler, Producer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type StageHandler = Arc<dyn MessageHandler<Error = StageError>>;

/// A running stage: its consumer tasks and the producers they write through.
pub struct StageRuntime {
    stage: Stage,
    tasks: Vec<JoinHandle<ConsumeSummary>>,
    producers: Vec<Producer>,
    intake: Option<Arc<OrderIntake>>,
}

impl StageRuntime {
    /// Build the handlers of `stage` and spawn one consume loop per consumer.
    ///
    /// Every loop exits once `shutdown` becomes `true`. Intake runs no
    /// consumer; its [`OrderIntake`] is returned through [`Self::intake`].
    #[must_use]
    pub fn start(
        stage: Stage,
        config: &Config,
        bus: Arc<dyn EventBus>,
        metrics: Arc<dyn MetricsSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let kafka = &config.kafka;
        let producer = |topic: &str| Producer::new(bus.clone(), topic);
        let mut producers = Vec::new();
        let mut intake = None;

        let handlers: Vec<StageHandler> = match stage {
            Stage::Intake => {
                let received = producer(&kafka.order_received_topic);
                let errors = producer(&kafka.error_topic);
                producers.extend([received.clone(), errors.clone()]);
                intake = Some(Arc::new(OrderIntake::new(received, errors, metrics)));
                vec![]
            }
            Stage::Inventory => {
                let confirmed = producer(&kafka.order_confirmed_topic);
                let errors = producer(&kafka.error_topic);
                producers.extend([confirmed.clone(), errors.clone()]);
                vec![Arc::new(InventoryStage::new(confirmed, errors, metrics)) as StageHandler]
            }
            Stage::Warehouse => {
                let outputs = WarehouseOutputs {
                    notifications: producer(&kafka.order_notification_topic),
                    picked_packed: producer(&kafka.order_picked_packed_topic),
                    errors: producer(&kafka.error_topic),
                };
                producers.extend([
                    outputs.notifications.clone(),
                    outputs.picked_packed.clone(),
                    outputs.errors.clone(),
                ]);
                vec![Arc::new(WarehouseStage::new(outputs, metrics)) as StageHandler]
            }
            Stage::Notification => {
                let errors = producer(&kafka.error_topic);
                producers.push(errors.clone());
                vec![Arc::new(NotificationStage::new(
                    Arc::new(LogDispatcher),
                    errors,
                    metrics,
                )) as StageHandler]
            }
            Stage::ErrorCounter => vec![Arc::new(ErrorCounterStage::new(metrics)) as StageHandler],
            Stage::TimeToShip => {
                let time_to_ship = TimeToShipStage::new(metrics);
                vec![
                    Arc::new(time_to_ship.received()) as StageHandler,
                    Arc::new(time_to_ship.picked_packed()) as StageHandler,
                ]
            }
        };

        let tasks = config
            .consumers(stage)
            .into_iter()
            .zip(handlers)
            .map(|(consumer, handler)| {
                tracing::info!(
                    stage = %stage,
                    broker = %consumer.broker,
                    topic = %consumer.topic,
                    group_id = %consumer.group_id,
                    "Spawning consumer"
                );
                let consumer = Consumer::new(bus.clone(), consumer.topic, consumer.group_id);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let summary = consumer.consume(shutdown, handler.as_ref()).await;
                    consumer.close();
                    summary
                })
            })
            .collect();

        Self {
            stage,
            tasks,
            producers,
            intake,
        }
    }

    /// The intake handle, on the intake stage only.
    #[must_use]
    pub fn intake(&self) -> Option<Arc<OrderIntake>> {
        self.intake.clone()
    }

    /// Number of consume loops started.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.tasks.len()
    }

    /// Wait up to `timeout` for every consume loop to exit, then flush the
    /// producers.
    ///
    /// Loops still running at the deadline are aborted. Returns the summaries
    /// of the loops that exited on their own.
    pub async fn join(self, timeout: Duration) -> Vec<ConsumeSummary> {
        let stage = self.stage;
        let aborts: Vec<_> = self.tasks.iter().map(JoinHandle::abort_handle).collect();

        let summaries =
            match tokio::time::timeout(timeout, futures::future::join_all(self.tasks)).await {
                Ok(results) => results
                    .into_iter()
                    .filter_map(|result| match result {
                        Ok(summary) => Some(summary),
                        Err(e) => {
                            tracing::error!(stage = %stage, error = %e, "Consumer task failed");
                            None
                        }
                    })
                    .collect(),
                Err(_) => {
                    tracing::warn!(
                        stage = %stage,
                        timeout_secs = timeout.as_secs(),
                        "Consumers did not stop in time, aborting"
                    );
                    aborts.iter().for_each(tokio::task::AbortHandle::abort);
                    Vec::new()
                }
            };

        for producer in &self.producers {
            if let Err(e) = producer.close().await {
                tracing::error!(stage = %stage, topic = producer.topic(), error = %e, "Failed to flush producer");
            }
        }

        tracing::info!(stage = %stage, consumers = summaries.len(), "Stage stopped");
        summaries
    }
}

impl std::fmt::Debug for StageRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRuntime")
            .field("stage", &self.stage)
            .field("consumers", &self.tasks.len())
            .field("producers", &self.producers)
            .finish_non_exhaustive()
    }
}
