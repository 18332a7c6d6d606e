//! In-memory broker for fast, deterministic pipeline tests.
//!
//! [`InMemoryEventBus`] keeps one append-only log per topic and one committed
//! offset per consumer group and topic, which is enough Kafka to exercise the
//! stages:
//! - a new group starts from the earliest message
//! - each message goes to one live member of every subscribed group
//! - a group that resubscribes resumes after what it already received
//!
//! Failure injection covers the paths stages must survive: failing publishes
//! per topic, raw (malformed) payloads, per-read transport errors and
//! subscriptions that end.

use fulfillment_core::event::Event;
use fulfillment_core::event_bus::{BusFuture, EventBus, EventBusError, Message, MessageStream};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

type Delivery = Result<Message, EventBusError>;

struct Subscriber {
    topics: Vec<String>,
    group_id: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Subscriber {
    fn reads(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}

#[derive(Default)]
struct State {
    logs: HashMap<String, Vec<Message>>,
    offsets: HashMap<(String, String), usize>,
    subscribers: Vec<Subscriber>,
    failing_topics: HashSet<String>,
}

impl State {
    /// Push every undelivered message of `topic` to each subscribed group.
    fn deliver(&mut self, topic: &str) {
        let groups: BTreeSet<String> = self
            .subscribers
            .iter()
            .filter(|s| s.reads(topic))
            .map(|s| s.group_id.clone())
            .collect();

        for group in groups {
            let cursor = (group.clone(), topic.to_string());
            loop {
                let offset = self.offsets.get(&cursor).copied().unwrap_or(0);
                let Some(message) = self.logs.get(topic).and_then(|log| log.get(offset)).cloned()
                else {
                    break;
                };
                if !self.send_to_group(&group, topic, &Ok(message)) {
                    break;
                }
                self.offsets.insert(cursor.clone(), offset + 1);
            }
        }
    }

    /// Send to the first live member of `group` reading `topic`, dropping
    /// members whose stream was dropped.
    fn send_to_group(&mut self, group: &str, topic: &str, item: &Delivery) -> bool {
        while let Some(index) = self
            .subscribers
            .iter()
            .position(|s| s.group_id == group && s.reads(topic))
        {
            if self.subscribers[index].sender.send(item.clone()).is_ok() {
                return true;
            }
            self.subscribers.remove(index);
        }
        false
    }

    fn append(&mut self, message: Message) {
        let topic = message.topic.clone();
        self.logs.entry(topic.clone()).or_default().push(message);
        self.deliver(&topic);
    }
}

/// In-memory [`EventBus`] with failure injection.
///
/// Clones share the same broker state.
///
/// # Example
///
/// ```
/// use fulfillment_core::event::{Event, EventName};
/// use fulfillment_core::event_bus::EventBus;
/// use fulfillment_testing::InMemoryEventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("order-received", &Event::new(EventName::OrderReceived, "{}")).await?;
///
/// assert_eq!(bus.published("order-received").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<State>>,
    closes: Arc<AtomicUsize>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not cascade into every other assertion.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every publish to `topic` fail until [`Self::restore_topic`].
    pub fn fail_topic(&self, topic: &str) {
        self.state().failing_topics.insert(topic.to_string());
    }

    /// Undo [`Self::fail_topic`].
    pub fn restore_topic(&self, topic: &str) {
        self.state().failing_topics.remove(topic);
    }

    /// Append raw bytes to `topic` as if another producer wrote them.
    pub fn inject_raw(&self, topic: &str, key: Option<&str>, payload: impl Into<Vec<u8>>) {
        self.state().append(Message {
            topic: topic.to_string(),
            key: key.map(|k| k.as_bytes().to_vec()),
            payload: payload.into(),
        });
    }

    /// Deliver a transport error to every group currently reading `topic`.
    pub fn inject_read_error(&self, topic: &str, reason: &str) {
        let mut state = self.state();
        let groups: BTreeSet<String> = state
            .subscribers
            .iter()
            .filter(|s| s.reads(topic))
            .map(|s| s.group_id.clone())
            .collect();
        let error = Err(EventBusError::TransportError(reason.to_string()));
        for group in groups {
            state.send_to_group(&group, topic, &error);
        }
    }

    /// End every open subscription stream.
    pub fn end_subscriptions(&self) {
        self.state().subscribers.clear();
    }

    /// Number of live subscriptions (including ones whose reader has gone
    /// but has not been noticed yet).
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Raw messages appended to `topic`, in order.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.state().logs.get(topic).cloned().unwrap_or_default()
    }

    /// Number of messages appended to `topic`.
    #[must_use]
    pub fn message_count(&self, topic: &str) -> usize {
        self.state().logs.get(topic).map_or(0, Vec::len)
    }

    /// Events published to `topic`, in order. Undecodable payloads are skipped.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Event> {
        self.messages(topic)
            .iter()
            .filter_map(|m| Event::decode(&m.payload).ok())
            .collect()
    }

    fn append_event(&self, topic: &str, event: &Event) -> Result<(), EventBusError> {
        let mut state = self.state();
        if state.failing_topics.contains(topic) {
            return Err(EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let payload = event.encode().map_err(|e| EventBusError::PublishFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        state.append(Message {
            topic: topic.to_string(),
            key: Some(event.event_id.as_bytes().to_vec()),
            payload,
        });
        Ok(())
    }

    /// How many times [`EventBus::close`] was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Wait up to five seconds for `topic` to hold at least `count` messages.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for_messages(&self, topic: &str, count: usize) -> bool {
        self.wait_until(Duration::from_secs(5), || self.message_count(topic) >= count)
            .await
    }

    /// Poll `condition` every few milliseconds until it holds or `timeout` passes.
    pub async fn wait_until(&self, timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: &str, event: &Event) -> BusFuture<'_, ()> {
        let result = self.append_event(topic, event);
        Box::pin(async move { result })
    }

    fn subscribe(&self, topics: &[&str], group_id: &str) -> BusFuture<'_, MessageStream> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        {
            let mut state = self.state();
            state.subscribers.push(Subscriber {
                topics: topics.iter().map(ToString::to_string).collect(),
                group_id: group_id.to_string(),
                sender,
            });
            for topic in topics {
                state.deliver(topic);
            }
        }

        let stream = async_stream::stream! {
            while let Some(item) = receiver.recv().await {
                yield item;
            }
        };

        Box::pin(async move { Ok(Box::pin(stream) as MessageStream) })
    }

    fn close(&self) -> BusFuture<'_, ()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("InMemoryEventBus")
            .field("topics", &state.logs.keys().collect::<Vec<_>>())
            .field("subscribers", &state.subscribers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use fulfillment_core::event::EventName;
    use futures::StreamExt;

    async fn next(stream: &mut MessageStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended")
    }

    #[tokio::test]
    async fn new_group_reads_from_earliest() {
        let bus = InMemoryEventBus::new();
        let first = Event::new(EventName::OrderReceived, "1");
        bus.publish("t", &first).await.unwrap();

        let mut stream = bus.subscribe(&["t"], "g").await.unwrap();
        let message = next(&mut stream).await.unwrap();
        assert_eq!(message.key_str().as_deref(), Some(first.event_id.as_str()));
    }

    #[tokio::test]
    async fn resubscribing_group_resumes_after_delivered() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", &Event::new(EventName::OrderReceived, "1"))
            .await
            .unwrap();
        {
            let mut stream = bus.subscribe(&["t"], "g").await.unwrap();
            next(&mut stream).await.unwrap();
        }

        let second = Event::new(EventName::OrderReceived, "2");
        bus.publish("t", &second).await.unwrap();
        let mut stream = bus.subscribe(&["t"], "g").await.unwrap();
        let message = next(&mut stream).await.unwrap();
        assert_eq!(Event::decode(&message.payload).unwrap(), second);
    }

    #[tokio::test]
    async fn each_group_gets_its_own_copy() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe(&["t"], "a").await.unwrap();
        let mut b = bus.subscribe(&["t"], "b").await.unwrap();

        bus.publish("t", &Event::new(EventName::Error, "x"))
            .await
            .unwrap();

        assert!(next(&mut a).await.is_ok());
        assert!(next(&mut b).await.is_ok());
    }

    #[tokio::test]
    async fn failing_topic_rejects_publish() {
        let bus = InMemoryEventBus::new();
        bus.fail_topic("t");
        let err = bus
            .publish("t", &Event::new(EventName::Error, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::PublishFailed { .. }));
        assert_eq!(bus.message_count("t"), 0);

        bus.restore_topic("t");
        assert!(bus.publish("t", &Event::new(EventName::Error, "x")).await.is_ok());
    }

    #[tokio::test]
    async fn read_errors_and_ended_streams_reach_the_reader() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["t"], "g").await.unwrap();

        bus.inject_read_error("t", "broker down");
        assert!(matches!(
            next(&mut stream).await,
            Err(EventBusError::TransportError(_))
        ));

        bus.end_subscriptions();
        assert!(stream.next().await.is_none());
    }
}
