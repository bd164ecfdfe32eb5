// ABOUTME: Tests for the in-memory backend's pub/sub behavior.
// ABOUTME: Covers acknowledgments, channel filtering, receiver counts, and failure injection.

use redibot_store::backends::memory::MemoryStore;
use redibot_store::{Connector, Credential, StoreError, SubscriptionEvent};
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn test_subscription_starts_with_acknowledgment() {
    let store = MemoryStore::new();
    let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
    let mut events = conn.subscribe("news").await.unwrap();

    let first = events.next_event().await.unwrap();
    assert_eq!(
        first,
        SubscriptionEvent::Subscription {
            kind: "subscribe".to_string(),
            channel: "news".to_string(),
            count: 1,
        }
    );
}

#[tokio::test]
async fn test_publish_reaches_only_matching_channel() {
    let store = MemoryStore::new();
    let mut sub_conn = store.connect("h:1", &Credential::default()).await.unwrap();
    let mut events = sub_conn.subscribe("news").await.unwrap();
    events.next_event().await.unwrap();

    let mut pub_conn = store.connect("h:1", &Credential::default()).await.unwrap();
    assert_eq!(pub_conn.publish("sports", "ignored").await.unwrap(), 0);
    assert_eq!(pub_conn.publish("news", "hello").await.unwrap(), 1);

    let event = timeout(Duration::from_secs(1), events.next_event())
        .await
        .expect("timed out waiting for message")
        .unwrap();
    assert_eq!(
        event,
        SubscriptionEvent::Message {
            channel: "news".to_string(),
            payload: "hello".to_string(),
        }
    );
}

#[tokio::test]
async fn test_messages_arrive_in_publish_order() {
    let store = MemoryStore::new();
    let mut sub_conn = store.connect("h:1", &Credential::default()).await.unwrap();
    let mut events = sub_conn.subscribe("c").await.unwrap();
    events.next_event().await.unwrap();

    let mut pub_conn = store.connect("h:1", &Credential::default()).await.unwrap();
    for i in 0..20 {
        pub_conn.publish("c", &format!("m{}", i)).await.unwrap();
    }

    for i in 0..20 {
        match events.next_event().await.unwrap() {
            SubscriptionEvent::Message { payload, .. } => assert_eq!(payload, format!("m{}", i)),
            other => panic!("Expected Message, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_injected_error_is_not_terminal() {
    let store = MemoryStore::new();
    let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
    let mut events = conn.subscribe("c").await.unwrap();
    events.next_event().await.unwrap();

    store.inject_subscription_error("bad frame");
    assert_eq!(
        events.next_event().await.unwrap(),
        SubscriptionEvent::Error {
            message: "bad frame".to_string()
        }
    );

    let mut pub_conn = store.connect("h:1", &Credential::default()).await.unwrap();
    pub_conn.publish("c", "still alive").await.unwrap();
    assert!(matches!(
        events.next_event().await.unwrap(),
        SubscriptionEvent::Message { .. }
    ));
}

#[tokio::test]
async fn test_severed_subscription_stays_closed() {
    let store = MemoryStore::new();
    let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
    let mut events = conn.subscribe("c").await.unwrap();
    events.next_event().await.unwrap();

    store.sever_subscriptions();
    assert_eq!(events.next_event().await.unwrap_err(), StoreError::Closed);
    assert_eq!(events.next_event().await.unwrap_err(), StoreError::Closed);
}

#[tokio::test]
async fn test_dropping_subscription_releases_receiver_count() {
    let store = MemoryStore::new();
    let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
    let events = conn.subscribe("c").await.unwrap();
    assert_eq!(store.subscriber_count("c"), 1);

    drop(events);
    assert_eq!(store.subscriber_count("c"), 0);
}
