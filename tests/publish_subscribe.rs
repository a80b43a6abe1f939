//! End-to-end publish and dispatch over the in-memory broker
//!
//! Run with:
//!   cargo test --test publish_subscribe

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventwire::broker::{MemoryBroker, MemorySubscription};
use eventwire::registry::{CachedRegistry, MemoryRegistry};
use eventwire::{
    AvroCodec, CborCodec, Codec, Describe, DispatchError, Envelope, Headers, JsonCodec, Metadata,
    OutboundMessage, PublishError, Publisher, PublisherConfig, SubscribeError, Subscriber,
    SubscriberConfig, Subscription, Transport, Verdict,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Describe)]
struct Book {
    id: String,
    author_id: String,
    status: String,
    pages: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Describe)]
struct Properties {
    key: String,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Describe)]
struct Event {
    id: String,
    #[serde(rename = "eventName")]
    event_name: String,
    platform: String,
    properties: Vec<Properties>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Describe)]
struct Author {
    id: String,
    name: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Registry = Arc<CachedRegistry<MemoryRegistry>>;

fn book(i: usize) -> Book {
    Book {
        id: format!("book-{}", i),
        author_id: "author-1".to_string(),
        status: "active".to_string(),
        pages: 100 + i as i32,
    }
}

fn envelope(event_name: &str, i: usize) -> Envelope<Book> {
    Envelope::new(book(i), Metadata::new(event_name, "catalog", format!("book-{}", i)))
}

fn setup<C: Codec + Clone>(
    codec: C,
) -> (Arc<MemoryBroker>, Registry, Arc<MemorySubscription>, Publisher<Book, C>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let broker = MemoryBroker::new();
    let registry = Arc::new(CachedRegistry::new(MemoryRegistry::new()));
    let subscription = broker.subscribe("books", "books-replica");
    let publisher = Publisher::<Book, C>::new(
        PublisherConfig::new("books"),
        broker.clone(),
        registry.clone(),
        codec,
    )
    .unwrap();
    (broker, registry, subscription, publisher)
}

/// Subscriber with a `create` handler that acks and an `inactive` handler
/// that nacks while reporting an error. Returns the event names seen.
fn book_subscriber<C: Codec>(codec: C, registry: &Registry) -> (Subscriber<Book, C>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut subscriber = Subscriber::<Book, C>::new(SubscriberConfig::new("books-replica").verbose(true), codec)
        .unwrap()
        .with_registry(registry.clone());

    let create_seen = seen.clone();
    subscriber
        .register("create", move |envelope: Envelope<Book>| {
            let seen = create_seen.clone();
            async move {
                seen.lock().unwrap().push(format!("create:{}", envelope.payload.id));
                Verdict::ack()
            }
        })
        .unwrap();

    let inactive_seen = seen.clone();
    subscriber
        .register("inactive", move |envelope: Envelope<Book>| {
            let seen = inactive_seen.clone();
            async move {
                seen.lock().unwrap().push(format!("inactive:{}", envelope.payload.id));
                Verdict::nack().with_error(anyhow::anyhow!("search index offline"))
            }
        })
        .unwrap();

    (subscriber, seen)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_routes_and_acks_by_verdict() {
    let (broker, registry, subscription, publisher) = setup(JsonCodec);
    let (subscriber, seen) = book_subscriber(JsonCodec, &registry);
    let cancel = CancellationToken::new();

    publisher.publish_sync(&cancel, &envelope("create", 0)).await.unwrap();
    publisher.publish_sync(&cancel, &envelope("inactive", 1)).await.unwrap();
    publisher.publish_sync(&cancel, &envelope("unknown", 2)).await.unwrap();
    broker.close();

    subscriber.subscribe(&*subscription, &cancel).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["create:book-0", "inactive:book-1"]);
    // create and the unroutable event are acknowledged; inactive is not.
    assert_eq!(subscription.acked_count(), 2);
    assert_eq!(subscription.pending_count(), 1);

    // The schema was registered once for all three publishes.
    assert_eq!(registry.backend().register_count(), 1);
    assert_eq!(registry.backend().versions("books-value"), vec![1]);
}

#[tokio::test]
async fn test_unacked_message_is_redelivered() {
    let (broker, registry, subscription, publisher) = setup(JsonCodec);
    let (subscriber, seen) = book_subscriber(JsonCodec, &registry);
    let cancel = CancellationToken::new();

    publisher.publish_sync(&cancel, &envelope("inactive", 7)).await.unwrap();
    let first = subscription.recv().await.unwrap().unwrap();
    assert!(!subscriber.process(&first).await.unwrap().is_ack());

    assert_eq!(subscription.redeliver_unacked(), 1);
    broker.close();
    subscriber.subscribe(&*subscription, &cancel).await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(subscription.pending_count(), 1);
}

#[tokio::test]
async fn test_async_publishes_resolve_in_any_order() {
    let (broker, registry, subscription, publisher) = setup(CborCodec);
    let (subscriber, seen) = book_subscriber(CborCodec, &registry);
    let cancel = CancellationToken::new();
    broker.set_latency(Duration::from_millis(5));

    let handles: Vec<_> = (0..5)
        .map(|i| publisher.publish_async(&cancel, &envelope("create", i)).unwrap())
        .collect();
    let mut offsets = Vec::new();
    for handle in handles {
        offsets.push(handle.await.unwrap().offset);
    }
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 1, 2, 3, 4]);

    broker.close();
    subscriber.subscribe(&*subscription, &cancel).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 5);
    assert_eq!(subscription.acked_count(), 5);
}

#[tokio::test]
async fn test_type_mismatch_stops_subscription_without_ack() {
    let (broker, registry, subscription, _publisher) = setup(JsonCodec);
    let (subscriber, seen) = book_subscriber(JsonCodec, &registry);
    let cancel = CancellationToken::new();

    // Another service publishes authors onto the books topic.
    let authors = Publisher::<Author>::new(
        PublisherConfig::new("books"),
        broker.clone(),
        registry.clone(),
        JsonCodec,
    )
    .unwrap();
    let author = Envelope::new(
        Author {
            id: "author-1".into(),
            name: "Ursula".into(),
        },
        Metadata::new("create", "people", "author-1"),
    );
    authors.publish_sync(&cancel, &author).await.unwrap();

    let result = subscriber.subscribe(&*subscription, &cancel).await;
    match result {
        Err(SubscribeError::Dispatch(DispatchError::Mismatch { expected, .. })) => {
            assert_eq!(expected, "Book")
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(subscription.acked_count(), 0);
    assert_eq!(subscription.pending_count(), 1);
}

#[tokio::test]
async fn test_poison_messages_are_dropped() {
    let (broker, registry, subscription, publisher) = setup(JsonCodec);
    let (subscriber, seen) = book_subscriber(JsonCodec, &registry);
    let cancel = CancellationToken::new();

    broker
        .produce(OutboundMessage {
            topic: "books".into(),
            key: "junk".into(),
            body: vec![0x7b, 0x7d],
            headers: Headers::new(),
        })
        .await
        .unwrap();
    publisher.publish_sync(&cancel, &envelope("create", 3)).await.unwrap();
    broker.close();

    subscriber.subscribe(&*subscription, &cancel).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["create:book-3"]);
    assert_eq!(subscription.acked_count(), 2);
}

#[tokio::test]
async fn test_cancel_stops_idle_subscription() {
    let (_broker, registry, subscription, _publisher) = setup(JsonCodec);
    let (subscriber, _seen) = book_subscriber(JsonCodec, &registry);
    let cancel = CancellationToken::new();

    let loop_cancel = cancel.clone();
    let consumer = tokio::spawn(async move { subscriber.subscribe(&*subscription, &loop_cancel).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    consumer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_validation_gates_perform_no_io() {
    let (broker, registry, _subscription, publisher) = setup(JsonCodec);
    let cancel = CancellationToken::new();

    let mut incomplete = envelope("create", 0);
    incomplete.metadata.origin.clear();
    assert!(matches!(
        publisher.publish_sync(&cancel, &incomplete).await,
        Err(PublishError::InvalidMetadata(_))
    ));

    let wrong = Envelope::new(
        Author {
            id: "a".into(),
            name: "b".into(),
        },
        Metadata::new("create", "catalog", "a"),
    );
    assert!(matches!(
        publisher.publish_async(&cancel, &wrong),
        Err(PublishError::InvalidPayloadType { .. })
    ));

    assert_eq!(broker.produce_count(), 0);
    assert_eq!(registry.backend().register_count(), 0);
}

#[tokio::test]
async fn test_nested_records_over_avro() {
    let broker = MemoryBroker::new();
    let registry = Arc::new(CachedRegistry::new(MemoryRegistry::new()));
    let subscription = broker.subscribe("analytics", "warehouse");
    let publisher = Publisher::<Event, AvroCodec>::new(
        PublisherConfig::new("analytics"),
        broker.clone(),
        registry.clone(),
        AvroCodec,
    )
    .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let clicks = Arc::new(AtomicUsize::new(0));
    let mut subscriber = Subscriber::<Event, AvroCodec>::new(SubscriberConfig::new("warehouse"), AvroCodec)
        .unwrap()
        .with_registry(registry.clone());
    {
        let received = received.clone();
        let clicks = clicks.clone();
        subscriber
            .register("click", move |envelope: Envelope<Event>| {
                let received = received.clone();
                let clicks = clicks.clone();
                async move {
                    clicks.fetch_add(1, Ordering::SeqCst);
                    received.lock().unwrap().push(envelope.payload);
                    Verdict::ack()
                }
            })
            .unwrap();
    }

    let event = Event {
        id: "e-1".into(),
        event_name: "click".into(),
        platform: "web".into(),
        properties: vec![
            Properties {
                key: "button".into(),
                value: "buy".into(),
            },
            Properties {
                key: "page".into(),
                value: "/checkout".into(),
            },
        ],
    };
    let cancel = CancellationToken::new();
    publisher
        .publish_sync(
            &cancel,
            &Envelope::new(&event, Metadata::new("click", "web", "e-1").with_user("u-42")),
        )
        .await
        .unwrap();
    broker.close();

    subscriber.subscribe(&*subscription, &cancel).await.unwrap();
    assert_eq!(clicks.load(Ordering::SeqCst), 1);
    assert_eq!(*received.lock().unwrap(), vec![event]);
    assert_eq!(
        publisher.schema().canonical_text(),
        r#"{"type":"record","name":"Event","fields":[{"name":"eventName","type":"string"},{"name":"id","type":"string"},{"name":"platform","type":"string"},{"name":"properties","type":{"type":"array","items":{"type":"record","name":"Properties","fields":[{"name":"key","type":"string"},{"name":"value","type":"string"}]}}}]}"#
    );
}
