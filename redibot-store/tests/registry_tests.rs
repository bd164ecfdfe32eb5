// ABOUTME: Tests for runtime store backend selection.
// ABOUTME: Verifies default registrations, unknown names, and factory config.

use redibot_store::{ConnectorRegistry, Credential, StoreError};
use serde_json::json;

#[test]
fn test_default_registry_lists_backends() {
    let registry = ConnectorRegistry::default();
    let available = registry.available();
    assert!(available.contains(&"memory"));
    #[cfg(feature = "redis")]
    assert!(available.contains(&"redis"));
}

#[test]
fn test_unknown_backend_is_unsupported() {
    let registry = ConnectorRegistry::default();
    let err = registry.create("etcd", &json!({})).err().unwrap();
    assert!(matches!(err, StoreError::Unsupported(_)));
    assert!(err.to_string().contains("etcd"));
}

#[tokio::test]
async fn test_memory_factory_applies_password() {
    let registry = ConnectorRegistry::default();
    let connector = registry
        .create("memory", &json!({ "password": "pw" }))
        .unwrap();
    assert_eq!(connector.name(), "memory");

    let denied = connector.connect("h:1", &Credential::default()).await;
    assert!(matches!(denied, Err(StoreError::AuthenticationFailed(_))));
    assert!(connector.connect("h:1", &Credential::from("pw")).await.is_ok());
}

#[test]
fn test_custom_registration() {
    let registry = ConnectorRegistry::new().register("custom", |_config| {
        Err(StoreError::Unsupported("custom".to_string()))
    });
    assert_eq!(registry.available(), vec!["custom"]);
    assert!(registry.create("custom", &json!(null)).is_err());
}
