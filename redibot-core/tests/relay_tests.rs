// ABOUTME: Integration tests for the registry, executor, publisher, and subscription relay
// ABOUTME: Runs against the in-memory store backend with failure injection

use redibot_core::{Credential, PoolConfig, Relay, RelayError, StoreValue};
use redibot_store::backends::memory::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn relay_for(store: &MemoryStore) -> Relay {
    Relay::new(Arc::new(store.clone()), PoolConfig::default())
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Wait until `channel` has `count` live subscribers on the store
async fn wait_for_subscribers(store: &MemoryStore, channel: &str, count: usize) {
    timeout(WAIT, async {
        while store.subscriber_count(channel) != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never reached");
}

// ─── Unregistered endpoint tests ───

#[tokio::test]
async fn test_unregistered_endpoint_fails_everywhere() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);

    let err = relay.executor.execute("nowhere:1", "GET", &args(&["k"])).await;
    assert!(matches!(err, Err(RelayError::EndpointNotRegistered(_))));

    let err = relay.publisher.publish("nowhere:1", "c", "hi").await;
    assert!(matches!(err, Err(RelayError::EndpointNotRegistered(_))));

    let err = relay.subscriptions.subscribe("nowhere:1", "c").await;
    assert!(matches!(err, Err(RelayError::EndpointNotRegistered(_))));

    assert_eq!(store.dial_count(), 0);
}

// ─── Executor tests ───

#[tokio::test]
async fn test_set_then_get() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let set = relay.executor.execute("h:1", "SET", &args(&["k", "v"])).await.unwrap();
    assert_eq!(set, StoreValue::Okay);

    let got = relay.executor.execute_text("h:1", "GET", &args(&["k"])).await.unwrap();
    assert_eq!(got, "v");
    assert_eq!(store.get("k").as_deref(), Some("v"));
}

#[tokio::test]
async fn test_remote_error_is_surfaced_verbatim() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let err = relay.executor.execute("h:1", "FLY", &[]).await.unwrap_err();
    assert!(matches!(err, RelayError::RemoteOperationFailed(_)));
    assert_eq!(err.to_string(), "ERR unknown command 'FLY'");
}

#[tokio::test]
async fn test_wrong_password_fails_lazily() {
    let store = MemoryStore::new().with_password("right");
    let relay = relay_for(&store);

    // Registration itself never dials
    relay.registry.register("h:1", Credential::from("wrong"));
    assert_eq!(store.dial_count(), 0);

    let err = relay.executor.execute("h:1", "PING", &[]).await.unwrap_err();
    assert!(matches!(err, RelayError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn test_reregister_uses_new_credential() {
    let store = MemoryStore::new().with_password("second");
    let relay = relay_for(&store);

    relay.registry.register("h:1", Credential::from("first"));
    relay.registry.register("h:1", Credential::from("second"));

    relay.executor.execute("h:1", "PING", &[]).await.unwrap();
    assert_eq!(store.auth_attempts(), vec!["second"]);
}

#[tokio::test]
async fn test_unreachable_host_is_remote_failure() {
    let store = MemoryStore::new();
    store.refuse_dials(true);
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let err = relay.executor.execute("h:1", "PING", &[]).await.unwrap_err();
    assert!(matches!(err, RelayError::RemoteOperationFailed(_)));
    assert!(err.to_string().contains("connection refused"));
}

// ─── Publish / subscribe tests ───

#[tokio::test]
async fn test_publish_reaches_subscriber() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let mut sub = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    assert_eq!(
        timeout(WAIT, sub.next_line()).await.unwrap().as_deref(),
        Some("c: subscribe 1")
    );

    let receivers = relay.publisher.publish("h:1", "c", "hello").await.unwrap();
    assert_eq!(receivers, 1);
    assert_eq!(
        timeout(WAIT, sub.next_line()).await.unwrap().as_deref(),
        Some("c: message: hello")
    );
}

#[tokio::test]
async fn test_subscription_preserves_order() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let mut sub = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    timeout(WAIT, sub.next_line()).await.unwrap();

    for i in 0..20 {
        relay.publisher.publish("h:1", "c", &format!("m{}", i)).await.unwrap();
    }
    for i in 0..20 {
        let line = timeout(WAIT, sub.next_line()).await.unwrap();
        assert_eq!(line, Some(format!("c: message: m{}", i)));
    }
}

#[tokio::test]
async fn test_nonterminal_error_keeps_subscription_open() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let mut sub = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    timeout(WAIT, sub.next_line()).await.unwrap();

    store.inject_subscription_error("glitch");
    relay.publisher.publish("h:1", "c", "after").await.unwrap();

    assert_eq!(
        timeout(WAIT, sub.next_line()).await.unwrap().as_deref(),
        Some("err: glitch")
    );
    assert_eq!(
        timeout(WAIT, sub.next_line()).await.unwrap().as_deref(),
        Some("c: message: after")
    );
}

#[tokio::test]
async fn test_terminal_error_ends_stream_after_err_line() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let mut sub = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    timeout(WAIT, sub.next_line()).await.unwrap();

    store.sever_subscriptions();
    assert_eq!(
        timeout(WAIT, sub.next_line()).await.unwrap().as_deref(),
        Some("err: connection closed")
    );
    assert_eq!(timeout(WAIT, sub.next_line()).await.unwrap(), None);
    sub.finish().await;

    wait_for_subscribers(&store, "c", 0).await;
    assert!(relay.subscriptions.active().is_empty());
}

#[tokio::test]
async fn test_reregister_closes_subscriptions() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let mut sub = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    timeout(WAIT, sub.next_line()).await.unwrap();

    relay.registry.register("h:1", Credential::default());
    assert_eq!(timeout(WAIT, sub.next_line()).await.unwrap(), None);
    wait_for_subscribers(&store, "c", 0).await;
}

#[tokio::test]
async fn test_unsubscribe_and_resubscribe() {
    let store = MemoryStore::new();
    let relay = relay_for(&store);
    relay.registry.register("h:1", Credential::default());

    let mut first = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    timeout(WAIT, first.next_line()).await.unwrap();

    // Same key again replaces the first subscription
    let mut second = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    assert_eq!(timeout(WAIT, first.next_line()).await.unwrap(), None);
    timeout(WAIT, second.next_line()).await.unwrap();
    assert_eq!(relay.subscriptions.active().len(), 1);

    assert!(relay.subscriptions.unsubscribe("h:1", "c"));
    assert!(!relay.subscriptions.unsubscribe("h:1", "c"));
    assert_eq!(timeout(WAIT, second.next_line()).await.unwrap(), None);
    wait_for_subscribers(&store, "c", 0).await;
}

#[tokio::test]
async fn test_subscription_holds_pool_slot() {
    let store = MemoryStore::new();
    let config = PoolConfig {
        max_active: 1,
        ..PoolConfig::default()
    };
    let relay = Relay::new(Arc::new(store.clone()), config);
    relay.registry.register("h:1", Credential::default());

    let sub = relay.subscriptions.subscribe("h:1", "c").await.unwrap();
    let err = relay.executor.execute("h:1", "PING", &[]).await.unwrap_err();
    assert!(matches!(err, RelayError::PoolExhausted(_)));

    sub.cancel();
    sub.finish().await;
    relay.executor.execute("h:1", "PING", &[]).await.unwrap();
}
