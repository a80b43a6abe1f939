//! In-process broker
//!
//! Topics fan out to every subscription attached to them. Delivered but
//! unacknowledged messages stay pending until acknowledged or explicitly
//! redelivered. Used for integration testing without a real broker.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::transport::{DeliveryReceipt, InboundMessage, OutboundMessage, Subscription, Transport};
use super::TransportError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct TopicState {
    next_offset: i64,
    subscriptions: Vec<Arc<MemorySubscription>>,
}

/// The simulated broker shared by publishers and subscribers.
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, TopicState>>,
    /// Every `produce` call, successful or not.
    produce_calls: AtomicUsize,
    available: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            produce_calls: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    /// Attach a subscription to a topic. Subscribing twice with the same
    /// name returns the existing subscription.
    pub fn subscribe(&self, topic: &str, name: &str) -> Arc<MemorySubscription> {
        let mut topics = lock(&self.topics);
        let state = topics.entry(topic.to_string()).or_default();
        if let Some(existing) = state.subscriptions.iter().find(|s| s.name == name) {
            return Arc::clone(existing);
        }
        let subscription = Arc::new(MemorySubscription::new(topic, name));
        state.subscriptions.push(Arc::clone(&subscription));
        subscription
    }

    /// Number of `produce` calls received so far.
    pub fn produce_count(&self) -> usize {
        self.produce_calls.load(Ordering::SeqCst)
    }

    /// Number of messages accepted on a topic.
    pub fn topic_len(&self, topic: &str) -> i64 {
        lock(&self.topics)
            .get(topic)
            .map(|t| t.next_offset)
            .unwrap_or(0)
    }

    /// Make subsequent produce calls fail with a connection error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulated broker round-trip latency applied to each produce call.
    /// Uses tokio time, so paused clocks advance instantly in tests.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Close every subscription; receivers drain what is queued, then stop.
    pub fn close(&self) {
        for state in lock(&self.topics).values() {
            for subscription in &state.subscriptions {
                subscription.close();
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn produce(&self, message: OutboundMessage) -> Result<DeliveryReceipt, TransportError> {
        self.produce_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionError(
                "broker unavailable".to_string(),
            ));
        }

        let (offset, subscriptions) = {
            let mut topics = lock(&self.topics);
            let state = topics.entry(message.topic.clone()).or_default();
            let offset = state.next_offset;
            state.next_offset += 1;
            (offset, state.subscriptions.clone())
        };

        for subscription in subscriptions {
            subscription.push(InboundMessage {
                id: format!("{}/{}/{}", message.topic, subscription.name, offset),
                key: Some(message.key.clone()),
                body: message.body.clone(),
                headers: message.headers.clone(),
                delivery_attempt: 0,
            });
        }

        Ok(DeliveryReceipt {
            topic: message.topic,
            partition: 0,
            offset,
        })
    }
}

/// A subscription on the in-process broker.
pub struct MemorySubscription {
    topic: String,
    name: String,
    queue: Mutex<VecDeque<InboundMessage>>,
    pending: Mutex<Vec<InboundMessage>>,
    acked: AtomicUsize,
    closed: AtomicBool,
    notify: Notify,
}

impl MemorySubscription {
    fn new(topic: &str, name: &str) -> Self {
        Self {
            topic: topic.to_string(),
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(Vec::new()),
            acked: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn push(&self, message: InboundMessage) {
        lock(&self.queue).push_back(message);
        self.notify.notify_waiters();
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Messages waiting to be delivered.
    pub fn queued_count(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Messages delivered but not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn acked_count(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    /// Put every unacknowledged message back on the queue, as an expired
    /// ack deadline would. Returns how many were requeued.
    pub fn redeliver_unacked(&self) -> usize {
        let expired: Vec<InboundMessage> = lock(&self.pending).drain(..).collect();
        let count = expired.len();
        {
            let mut queue = lock(&self.queue);
            for message in expired.into_iter().rev() {
                queue.push_front(message);
            }
        }
        if count > 0 {
            self.notify.notify_waiters();
        }
        count
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recv(&self) -> Result<Option<InboundMessage>, TransportError> {
        loop {
            // Registered before checking state so a push in between is not lost.
            let notified = self.notify.notified();

            let next = lock(&self.queue).pop_front();
            if let Some(mut message) = next {
                message.delivery_attempt += 1;
                lock(&self.pending).push(message.clone());
                return Ok(Some(message));
            }
            if self.is_closed() {
                return Ok(None);
            }

            notified.await;
        }
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let mut pending = lock(&self.pending);
        match pending.iter().position(|m| m.id == message.id) {
            Some(index) => {
                pending.remove(index);
                self.acked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(TransportError::UnknownMessage(message.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Headers;

    fn outbound(topic: &str, body: &[u8]) -> OutboundMessage {
        OutboundMessage {
            topic: topic.to_string(),
            key: "key-1".to_string(),
            body: body.to_vec(),
            headers: Headers::from([("event_name".to_string(), "create".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_subscriptions() {
        let broker = MemoryBroker::new();
        let first = broker.subscribe("books", "replica-a");
        let second = broker.subscribe("books", "replica-b");
        let other = broker.subscribe("authors", "replica-a");

        let receipt = broker.produce(outbound("books", b"one")).await.unwrap();
        assert_eq!(receipt.offset, 0);
        let receipt = broker.produce(outbound("books", b"two")).await.unwrap();
        assert_eq!(receipt.offset, 1);

        assert_eq!(first.queued_count(), 2);
        assert_eq!(second.queued_count(), 2);
        assert_eq!(other.queued_count(), 0);
        assert_eq!(broker.topic_len("books"), 2);
        assert_eq!(broker.produce_count(), 2);

        let message = first.recv().await.unwrap().unwrap();
        assert_eq!(message.body, b"one");
        assert_eq!(message.key.as_deref(), Some("key-1"));
        assert_eq!(message.delivery_attempt, 1);
        assert_eq!(message.headers.get("event_name").unwrap(), "create");
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = MemoryBroker::new();
        let a = broker.subscribe("books", "replica");
        let b = broker.subscribe("books", "replica");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_ack_and_redelivery() {
        let broker = MemoryBroker::new();
        let subscription = broker.subscribe("books", "replica");
        broker.produce(outbound("books", b"one")).await.unwrap();
        broker.produce(outbound("books", b"two")).await.unwrap();

        let one = subscription.recv().await.unwrap().unwrap();
        let two = subscription.recv().await.unwrap().unwrap();
        subscription.ack(&one).await.unwrap();
        assert_eq!(subscription.pending_count(), 1);
        assert_eq!(subscription.acked_count(), 1);

        // Double ack is rejected.
        assert!(matches!(
            subscription.ack(&one).await,
            Err(TransportError::UnknownMessage(_))
        ));

        assert_eq!(subscription.redeliver_unacked(), 1);
        let again = subscription.recv().await.unwrap().unwrap();
        assert_eq!(again.id, two.id);
        assert_eq!(again.delivery_attempt, 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let broker = MemoryBroker::new();
        let subscription = broker.subscribe("books", "replica");
        broker.produce(outbound("books", b"last")).await.unwrap();
        broker.close();

        assert!(subscription.recv().await.unwrap().is_some());
        assert!(subscription.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_produce() {
        let broker = MemoryBroker::new();
        let subscription = broker.subscribe("books", "replica");

        let waiter = {
            let subscription = Arc::clone(&subscription);
            tokio::spawn(async move { subscription.recv().await })
        };
        tokio::task::yield_now().await;
        broker.produce(outbound("books", b"late")).await.unwrap();

        let message = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(message.body, b"late");
    }

    #[tokio::test]
    async fn test_unavailable_broker() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let result = broker.produce(outbound("books", b"x")).await;
        assert!(matches!(result, Err(TransportError::ConnectionError(_))));
        assert_eq!(broker.produce_count(), 1);
        assert_eq!(broker.topic_len("books"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_time() {
        let broker = MemoryBroker::new();
        broker.set_latency(Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        broker.produce(outbound("books", b"slow")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
