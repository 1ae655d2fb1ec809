//! InMemoryBroker - 開発用のブローカー
//!
//! Per-topic FIFO with lease semantics: a received message is in flight until
//! it is acked. Nacked (or dropped) deliveries come back after
//! `redelivery_delay`, mimicking a broker visibility timeout.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::BrokerError;
use crate::ports::{Broker, BrokerRecord, Delivery};

#[derive(Debug, Clone)]
struct Message {
    key: String,
    payload: Vec<u8>,
    delivery_count: u32,
}

/// Nacked message waiting for its visibility delay.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug)]
struct Scheduled {
    visible_at: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.visible_at == other.visible_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct TopicState {
    ready: VecDeque<Message>,
    scheduled: BinaryHeap<Scheduled>,
    in_flight: usize,
    acked: usize,
    nacked: usize,
    /// Every record ever published, for inspection.
    published: Vec<BrokerRecord>,
    reject_publishes: bool,
}

impl TopicState {
    fn promote_scheduled(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.visible_at > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.message);
            }
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    next_seq: u64,
}

impl BrokerState {
    fn topic(&mut self, topic: &str) -> &mut TopicState {
        self.topics.entry(topic.to_string()).or_default()
    }

    fn requeue(&mut self, topic: &str, message: Message, visible_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let state = self.topic(topic);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.nacked += 1;
        state.scheduled.push(Scheduled {
            visible_at,
            seq,
            message,
        });
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory `Broker` for development and tests.
///
/// # 使用例
/// ```ignore
/// let broker = InMemoryBroker::new(Duration::from_secs(1));
/// broker.publish("doc-tasks", "D1", bytes).await?;
/// let delivery = broker.receive("doc-tasks", Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    redelivery_delay: Duration,
}

impl InMemoryBroker {
    pub fn new(redelivery_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            redelivery_delay,
        }
    }

    /// Every record ever published to `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<BrokerRecord> {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    /// Messages waiting to be delivered (ready + waiting for redelivery).
    pub fn depth(&self, topic: &str) -> usize {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|t| t.ready.len() + t.scheduled.len())
            .unwrap_or(0)
    }

    pub fn in_flight(&self, topic: &str) -> usize {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|t| t.in_flight)
            .unwrap_or(0)
    }

    pub fn acked(&self, topic: &str) -> usize {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|t| t.acked)
            .unwrap_or(0)
    }

    pub fn nacked(&self, topic: &str) -> usize {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|t| t.nacked)
            .unwrap_or(0)
    }

    /// Make every publish to `topic` fail (simulates an unreachable partition).
    pub fn reject_publishes(&self, topic: &str, reject: bool) {
        lock(&self.state).topic(topic).reject_publishes = reject;
    }

    fn try_take(&self, topic: &str) -> Result<BrokerRecord, Option<Instant>> {
        let mut state = lock(&self.state);
        let topic_state = state.topic(topic);
        topic_state.promote_scheduled(Instant::now());

        match topic_state.ready.pop_front() {
            Some(mut message) => {
                message.delivery_count += 1;
                topic_state.in_flight += 1;
                Ok(BrokerRecord {
                    topic: topic.to_string(),
                    key: message.key,
                    payload: message.payload,
                    delivery_count: message.delivery_count,
                })
            }
            None => Err(topic_state.scheduled.peek().map(|s| s.visible_at)),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        {
            let mut state = lock(&self.state);
            let topic_state = state.topic(topic);
            if topic_state.reject_publishes {
                return Err(BrokerError::Rejected(topic.to_string()));
            }
            topic_state.published.push(BrokerRecord {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.clone(),
                delivery_count: 0,
            });
            topic_state.ready.push_back(Message {
                key: key.to_string(),
                payload,
                delivery_count: 0,
            });
        } // Lock released here

        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before looking, so a publish in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_visible = match self.try_take(topic) {
                Ok(record) => {
                    return Ok(Some(Box::new(InMemoryDelivery {
                        record,
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                        redelivery_delay: self.redelivery_delay,
                        settled: false,
                    })));
                }
                Err(next_visible) => next_visible,
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {},
                _ = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }
}

/// Lease implementation for InMemoryBroker.
struct InMemoryDelivery {
    record: BrokerRecord,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    redelivery_delay: Duration,
    settled: bool,
}

impl InMemoryDelivery {
    fn requeue(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let message = Message {
            key: self.record.key.clone(),
            payload: std::mem::take(&mut self.record.payload),
            delivery_count: self.record.delivery_count,
        };
        let visible_at = Instant::now() + self.redelivery_delay;
        lock(&self.state).requeue(&self.record.topic, message, visible_at);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn record(&self) -> &BrokerRecord {
        &self.record
    }

    async fn ack(mut self: Box<Self>) -> Result<(), BrokerError> {
        self.settled = true;
        let mut state = lock(&self.state);
        let topic = state.topic(&self.record.topic);
        topic.in_flight = topic.in_flight.saturating_sub(1);
        topic.acked += 1;
        Ok(())
    }

    async fn nack(mut self: Box<Self>) -> Result<(), BrokerError> {
        self.requeue();
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        // unsettled lease = visibility timeout
        self.requeue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_receive_roundtrip() {
        let broker = InMemoryBroker::default();
        broker.publish("main", "D1", b"hello".to_vec()).await.unwrap();

        let delivery = broker
            .receive("main", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.record().key, "D1");
        assert_eq!(delivery.record().payload, b"hello");
        assert_eq!(delivery.record().delivery_count, 1);
        assert_eq!(broker.in_flight("main"), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.in_flight("main"), 0);
        assert_eq!(broker.acked("main"), 1);
        assert_eq!(broker.depth("main"), 0);
        assert_eq!(broker.published("main").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_on_empty_topic() {
        let broker = InMemoryBroker::default();
        let start = Instant::now();
        let got = broker.receive("main", Duration::from_millis(500)).await.unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn nack_redelivers_after_visibility_delay() {
        let broker = InMemoryBroker::new(Duration::from_secs(2));
        broker.publish("main", "D1", b"x".to_vec()).await.unwrap();

        let first = broker.receive("main", Duration::from_secs(1)).await.unwrap().unwrap();
        first.nack().await.unwrap();
        assert_eq!(broker.nacked("main"), 1);
        assert_eq!(broker.depth("main"), 1);

        // not visible yet
        let none = broker.receive("main", Duration::from_millis(500)).await.unwrap();
        assert!(none.is_none());

        let again = broker.receive("main", Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(again.record().delivery_count, 2);
        again.ack().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_delivery_is_redelivered() {
        let broker = InMemoryBroker::new(Duration::from_millis(100));
        broker.publish("main", "D1", b"x".to_vec()).await.unwrap();

        let delivery = broker.receive("main", Duration::from_secs(1)).await.unwrap();
        drop(delivery);

        let again = broker.receive("main", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(again.record().payload, b"x");
        assert_eq!(again.record().delivery_count, 2);
    }

    #[tokio::test]
    async fn publish_wakes_waiting_receiver() {
        let broker = Arc::new(InMemoryBroker::default());

        let waiter = tokio::spawn({
            let broker = Arc::clone(&broker);
            async move {
                broker
                    .receive("retry", Duration::from_secs(5))
                    .await
                    .unwrap()
                    .map(|d| d.record().key.clone())
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.publish("retry", "D9", b"x".to_vec()).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some("D9".to_string()));
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let broker = InMemoryBroker::default();
        broker.publish("a", "k1", b"1".to_vec()).await.unwrap();
        broker.publish("b", "k2", b"2".to_vec()).await.unwrap();

        let b = broker.receive("b", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(b.record().key, "k2");
        assert_eq!(broker.depth("a"), 1);
    }

    #[tokio::test]
    async fn rejected_topic_fails_publish() {
        let broker = InMemoryBroker::default();
        broker.reject_publishes("dlq", true);
        let err = broker.publish("dlq", "k", vec![]).await.unwrap_err();
        assert_eq!(err, BrokerError::Rejected("dlq".into()));
        assert!(broker.published("dlq").is_empty());
    }
}
