//! Consume loop behavior against the in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use fulfillment_core::event_bus::Message;
use fulfillment_runtime::{
    ConsumeSummary, Consumer, Disposition, HandlerFuture, MessageHandler, MessageOutcome,
    RetryPolicy,
};
use fulfillment_testing::InMemoryEventBus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const TOPIC: &str = "order-received";

#[derive(Debug, thiserror::Error)]
#[error("rejected payload {0}")]
struct Rejected(String);

/// Records payloads; rejects "bad" and skips "skip".
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl MessageHandler for Recorder {
    type Error = Rejected;

    fn name(&self) -> &'static str {
        "recorder"
    }

    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a, Self::Error> {
        Box::pin(async move {
            let payload = String::from_utf8_lossy(&message.payload).into_owned();
            match payload.as_str() {
                "bad" => Err(Rejected(payload)),
                "skip" => Ok(Disposition::Skipped),
                _ => {
                    self.seen.lock().unwrap().push(payload);
                    Ok(Disposition::Recorded)
                }
            }
        })
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    outcomes: mpsc::UnboundedReceiver<MessageOutcome>,
    task: JoinHandle<ConsumeSummary>,
}

impl Running {
    async fn next_outcome(&mut self) -> MessageOutcome {
        tokio::time::timeout(Duration::from_secs(2), self.outcomes.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("outcome channel closed")
    }

    async fn stop(self) -> ConsumeSummary {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("consumer did not stop")
            .expect("consumer task panicked")
    }
}

fn start(bus: &InMemoryEventBus, handler: Arc<Recorder>) -> Running {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (outcome_tx, outcomes) = mpsc::unbounded_channel();
    let consumer = Consumer::new(Arc::new(bus.clone()), TOPIC, "test-group")
        .with_backoff(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(50))
                .build(),
        )
        .with_outcomes(outcome_tx);

    let task = tokio::spawn(async move {
        let summary = consumer.consume(shutdown_rx, handler.as_ref()).await;
        consumer.close();
        summary
    });

    Running {
        shutdown,
        outcomes,
        task,
    }
}

#[tokio::test]
async fn handler_errors_do_not_stop_the_loop() {
    let bus = InMemoryEventBus::new();
    bus.inject_raw(TOPIC, Some("k1"), "first");
    bus.inject_raw(TOPIC, Some("k2"), "bad");
    bus.inject_raw(TOPIC, Some("k3"), "skip");
    bus.inject_raw(TOPIC, Some("k4"), "second");

    let handler = Arc::new(Recorder::default());
    let mut running = start(&bus, handler.clone());

    let labels = [
        running.next_outcome().await,
        running.next_outcome().await,
        running.next_outcome().await,
        running.next_outcome().await,
    ]
    .map(|outcome| outcome.label());
    assert_eq!(labels, ["recorded", "failed", "skipped", "recorded"]);

    let summary = running.stop().await;
    assert_eq!(
        summary,
        ConsumeSummary {
            processed: 2,
            skipped: 1,
            failed: 1,
            read_errors: 0,
        }
    );
    assert_eq!(handler.seen(), vec!["first", "second"]);
}

#[tokio::test]
async fn outcome_carries_topic_key_and_error_text() {
    let bus = InMemoryEventBus::new();
    bus.inject_raw(TOPIC, Some("evt-1"), "bad");

    let mut running = start(&bus, Arc::new(Recorder::default()));
    let outcome = running.next_outcome().await;

    assert_eq!(outcome.stage, "recorder");
    assert_eq!(outcome.topic, TOPIC);
    assert_eq!(outcome.key.as_deref(), Some("evt-1"));
    assert_eq!(outcome.result, Err("rejected payload bad".to_string()));
    running.stop().await;
}

#[tokio::test]
async fn shutdown_stops_an_idle_loop() {
    let bus = InMemoryEventBus::new();
    let running = start(&bus, Arc::new(Recorder::default()));

    assert!(
        bus.wait_until(Duration::from_secs(2), || bus.subscription_count() == 1)
            .await
    );
    assert_eq!(running.stop().await, ConsumeSummary::default());
}

#[tokio::test]
async fn dropped_shutdown_sender_ends_the_loop() {
    let bus = InMemoryEventBus::new();
    let running = start(&bus, Arc::new(Recorder::default()));
    drop(running.shutdown);

    let summary = tokio::time::timeout(Duration::from_secs(2), running.task)
        .await
        .expect("consumer did not stop")
        .unwrap();
    assert_eq!(summary, ConsumeSummary::default());
}

#[tokio::test]
async fn read_errors_are_counted_and_reading_continues() {
    let bus = InMemoryEventBus::new();
    let handler = Arc::new(Recorder::default());
    let mut running = start(&bus, handler.clone());
    assert!(
        bus.wait_until(Duration::from_secs(2), || bus.subscription_count() == 1)
            .await
    );

    bus.inject_read_error(TOPIC, "broker unavailable");
    bus.inject_raw(TOPIC, None, "after-error");

    let outcome = running.next_outcome().await;
    assert_eq!(outcome.result, Ok(Disposition::Recorded));
    assert_eq!(outcome.key, None);

    let summary = running.stop().await;
    assert_eq!(summary.read_errors, 1);
    assert_eq!(handler.seen(), vec!["after-error"]);
}

#[tokio::test]
async fn ended_subscription_is_reestablished() {
    let bus = InMemoryEventBus::new();
    let handler = Arc::new(Recorder::default());
    let mut running = start(&bus, handler.clone());
    assert!(
        bus.wait_until(Duration::from_secs(2), || bus.subscription_count() == 1)
            .await
    );

    bus.end_subscriptions();
    bus.inject_raw(TOPIC, None, "while-away");

    let outcome = running.next_outcome().await;
    assert_eq!(outcome.result, Ok(Disposition::Recorded));
    assert_eq!(handler.seen(), vec!["while-away"]);
    running.stop().await;
}
