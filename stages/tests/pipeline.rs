//! Pipeline scenarios over the in-memory bus.
#![allow(clippy::unwrap_used)]

use chrono::Duration as ChronoDuration;
use fulfillment_core::event::{Event, EventName};
use fulfillment_core::event_bus::EventBus;
use fulfillment_core::observability::MetricsSink;
use fulfillment_core::order::{Notification, NotificationType, Order};
use fulfillment_runtime::{Consumer, Disposition, MessageOutcome};
use fulfillment_stages::{Config, ErrorCounterStage, Stage, StageRuntime, TimeToShipStage};
use fulfillment_testing::{InMemoryEventBus, RecordingSink, helpers};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn config() -> Config {
    Config::from_lookup(|_| None).unwrap()
}

fn start(
    stage: Stage,
    bus: &InMemoryEventBus,
    sink: &Arc<RecordingSink>,
    shutdown: &watch::Receiver<bool>,
) -> StageRuntime {
    let bus: Arc<dyn EventBus> = Arc::new(bus.clone());
    let metrics: Arc<dyn MetricsSink> = sink.clone();
    StageRuntime::start(stage, &config(), bus, metrics, shutdown.clone())
}

async fn next_outcome(outcomes: &mut mpsc::UnboundedReceiver<MessageOutcome>) -> MessageOutcome {
    tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn received_order_is_confirmed_once() {
    helpers::init_tracing();
    let bus = InMemoryEventBus::new();
    let sink = Arc::new(RecordingSink::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let received = helpers::order("A1").to_event(EventName::OrderReceived).unwrap();

    bus.publish("order-received", &received).await.unwrap();
    bus.publish("order-received", &received).await.unwrap();
    let inventory = start(Stage::Inventory, &bus, &sink, &shutdown_rx);

    assert!(bus.wait_for_messages("order-error", 1).await);
    let confirmed = bus.published("order-confirmed");
    assert_eq!(confirmed.len(), 1);
    assert!(confirmed[0].is(EventName::OrderConfirmed));
    assert_eq!(confirmed[0].event_body, received.event_body);

    let errors = bus.published("order-error");
    let message = errors[0].error_message.clone().unwrap();
    assert!(message.contains("A1"));
    assert!(message.contains("duplicate"));

    shutdown_tx.send(true).unwrap();
    let summaries = inventory.join(Duration::from_secs(5)).await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].processed, 1);
    assert_eq!(summaries[0].failed, 1);
}

#[tokio::test]
async fn replayed_failure_is_counted_once() {
    let bus = InMemoryEventBus::new();
    let sink = Arc::new(RecordingSink::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let received = helpers::order("A1").to_event(EventName::OrderReceived).unwrap();

    for _ in 0..3 {
        bus.publish("order-received", &received).await.unwrap();
    }
    let inventory = start(Stage::Inventory, &bus, &sink, &shutdown_rx);
    assert!(bus.wait_for_messages("order-error", 2).await);

    let errors = bus.published("order-error");
    assert!(errors.iter().all(|e| e.event_id == received.event_id));
    assert!(errors.iter().all(|e| e.is(EventName::Error)));

    let counter = ErrorCounterStage::new(sink.clone());
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();
    let consumer = Consumer::new(Arc::new(bus.clone()), "order-error", "error-counter-group")
        .with_outcomes(outcomes_tx);
    let rx = shutdown_rx.clone();
    tokio::spawn(async move { consumer.consume(rx, &counter).await });

    assert_eq!(
        next_outcome(&mut outcomes).await.result,
        Ok(Disposition::Recorded)
    );
    assert_eq!(
        next_outcome(&mut outcomes).await.result,
        Ok(Disposition::Skipped)
    );
    assert_eq!(sink.error_count("A1"), 1);

    shutdown_tx.send(true).unwrap();
    inventory.join(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn time_to_ship_is_observed_once_per_order() {
    let bus = InMemoryEventBus::new();
    let sink = Arc::new(RecordingSink::new());
    let stage = TimeToShipStage::new(sink.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();

    let body = helpers::order("B2").to_body().unwrap();
    let t0 = helpers::t0();
    bus.publish(
        "order-received",
        &Event::at(EventName::OrderReceived, body.clone(), t0),
    )
    .await
    .unwrap();

    let received = Consumer::new(Arc::new(bus.clone()), "order-received", "time-to-ship-group")
        .with_outcomes(outcomes_tx.clone());
    let handler = stage.received();
    let rx = shutdown_rx.clone();
    tokio::spawn(async move { received.consume(rx, &handler).await });
    assert_eq!(
        next_outcome(&mut outcomes).await.result,
        Ok(Disposition::Recorded)
    );

    for offset in [45, 60] {
        let packed = Event::at(
            EventName::OrderPickedPacked,
            body.clone(),
            t0 + ChronoDuration::seconds(offset),
        );
        bus.publish("order-picked-packed", &packed).await.unwrap();
    }
    let picked = Consumer::new(
        Arc::new(bus.clone()),
        "order-picked-packed",
        "time-to-ship-group",
    )
    .with_outcomes(outcomes_tx);
    let handler = stage.picked_packed();
    tokio::spawn(async move { picked.consume(shutdown_rx, &handler).await });

    assert_eq!(
        next_outcome(&mut outcomes).await.result,
        Ok(Disposition::Recorded)
    );
    assert_eq!(
        next_outcome(&mut outcomes).await.result,
        Ok(Disposition::Skipped)
    );
    assert_eq!(sink.time_to_ship(), vec![45.0]);
    assert_eq!(stage.pending(), 0);
}

#[tokio::test]
async fn unpaired_picked_packed_is_neither_observed_nor_reported() {
    let bus = InMemoryEventBus::new();
    let sink = Arc::new(RecordingSink::new());
    let stage = TimeToShipStage::new(sink.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();

    let packed = helpers::order("Z9")
        .to_event(EventName::OrderPickedPacked)
        .unwrap();
    bus.publish("order-picked-packed", &packed).await.unwrap();

    let consumer = Consumer::new(
        Arc::new(bus.clone()),
        "order-picked-packed",
        "time-to-ship-group",
    )
    .with_outcomes(outcomes_tx);
    let handler = stage.picked_packed();
    tokio::spawn(async move { consumer.consume(shutdown_rx, &handler).await });

    assert_eq!(
        next_outcome(&mut outcomes).await.result,
        Ok(Disposition::Skipped)
    );
    assert!(sink.time_to_ship().is_empty());
    assert_eq!(bus.message_count("order-error"), 0);
}

#[tokio::test]
async fn submitted_order_flows_through_every_stage() {
    helpers::init_tracing();
    let bus = InMemoryEventBus::new();
    let sink = Arc::new(RecordingSink::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let intake = start(Stage::Intake, &bus, &sink, &shutdown_rx);
    let time_to_ship = start(Stage::TimeToShip, &bus, &sink, &shutdown_rx);
    let error_counter = start(Stage::ErrorCounter, &bus, &sink, &shutdown_rx);
    let orders = intake.intake().unwrap();
    assert_eq!(intake.consumer_count(), 0);
    assert_eq!(time_to_ship.consumer_count(), 2);

    orders.submit(&helpers::order("A1")).await.unwrap();
    // Receipt must be recorded before anything downstream can be picked & packed.
    assert!(
        bus.wait_until(Duration::from_secs(5), || {
            sink.store_size(TimeToShipStage::NAME) == Some(1)
        })
        .await
    );

    let inventory = start(Stage::Inventory, &bus, &sink, &shutdown_rx);
    let warehouse = start(Stage::Warehouse, &bus, &sink, &shutdown_rx);
    let notification = start(Stage::Notification, &bus, &sink, &shutdown_rx);

    assert!(bus.wait_for_messages("order-notification", 1).await);
    assert!(bus.wait_for_messages("order-picked-packed", 1).await);
    assert!(
        bus.wait_until(Duration::from_secs(5), || sink.time_to_ship().len() == 1)
            .await
    );
    assert!(sink.time_to_ship()[0] >= 0.0);

    let notifications = bus.published("order-notification");
    let sent = Notification::decode(notifications[0].event_body.as_bytes()).unwrap();
    assert_eq!(sent.kind, NotificationType::OrderFulfilled);
    assert_eq!(sent.order, helpers::order("A1"));

    // A resubmission is rejected at intake and counted once.
    assert!(orders.submit(&helpers::order("A1")).await.unwrap_err().is_duplicate());
    assert!(
        bus.wait_until(Duration::from_secs(5), || sink.error_count("A1") == 1)
            .await
    );
    assert_eq!(bus.message_count("order-received"), 1);

    shutdown_tx.send(true).unwrap();
    for runtime in [
        intake,
        inventory,
        warehouse,
        notification,
        error_counter,
        time_to_ship,
    ] {
        runtime.join(Duration::from_secs(5)).await;
    }
    assert!(bus.close_count() > 0);

    let received = bus.published("order-received");
    assert_eq!(
        Order::decode(received[0].event_body.as_bytes()).unwrap().order_id,
        "A1"
    );
}
