// ABOUTME: In-memory store backend for tests and local runs without a server.
// ABOUTME: Supports a small command set, pub/sub, passwords, and failure injection.
//!
//! # Example
//!
//! ```no_run
//! use redibot_store::backends::memory::MemoryStore;
//! use redibot_store::{Connector, Credential, StoreValue};
//!
//! # async fn example() {
//! let store = MemoryStore::new().with_password("s3cret");
//! let mut conn = store
//!     .connect("localhost:6379", &Credential::from("s3cret"))
//!     .await
//!     .unwrap();
//!
//! conn.execute("SET", &["k".into(), "v".into()]).await.unwrap();
//! let value = conn.execute("GET", &["k".into()]).await.unwrap();
//! assert_eq!(value, StoreValue::bulk("v"));
//! # }
//! ```

use crate::{
    Connector, Credential, EventSource, StoreConnection, StoreError, StoreValue,
    SubscriptionEvent,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum BusItem {
    Publish { channel: String, payload: String },
    Error { message: String },
    Sever,
}

#[derive(Debug, Default)]
struct MemoryState {
    password: Option<String>,
    strings: HashMap<String, String>,
    subscribers: HashMap<String, usize>,
    auth_attempts: Vec<String>,
    dials: usize,
    refuse_dials: bool,
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    bus: broadcast::Sender<BusItem>,
}

impl MemoryStore {
    /// Create an empty store with no password
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            bus,
        }
    }

    /// Require `password` on every new connection
    pub fn with_password(self, password: &str) -> Self {
        self.set_password(Some(password));
        self
    }

    pub fn set_password(&self, password: Option<&str>) {
        self.lock().password = password.map(str::to_string);
    }

    /// Make every subsequent dial fail as if the host were unreachable
    pub fn refuse_dials(&self, refuse: bool) {
        self.lock().refuse_dials = refuse;
    }

    /// Number of dial attempts that reached the store
    pub fn dial_count(&self) -> usize {
        self.lock().dials
    }

    /// Credentials presented during handshakes, oldest first
    pub fn auth_attempts(&self) -> Vec<String> {
        self.lock().auth_attempts.clone()
    }

    /// Current value of `key`, bypassing connections
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().strings.get(key).cloned()
    }

    /// Number of live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().subscribers.get(channel).copied().unwrap_or(0)
    }

    /// Push a non-terminal error event to every subscription
    pub fn inject_subscription_error(&self, message: &str) {
        let _ = self.bus.send(BusItem::Error {
            message: message.to_string(),
        });
    }

    /// Put every subscribed connection into a permanent error state
    pub fn sever_subscriptions(&self) {
        let _ = self.bus.send(BusItem::Sever);
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::ConnectorFactory {
        Box::new(|config| {
            let store = MemoryStore::new();
            if let Some(password) = config.get("password").and_then(|v| v.as_str()) {
                store.set_password(Some(password));
            }
            Ok(Arc::new(store))
        })
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run(&self, verb: &str, args: &[String]) -> Result<StoreValue, StoreError> {
        let upper = verb.to_ascii_uppercase();
        let arity = |min: usize, max: Option<usize>| -> Result<(), StoreError> {
            let ok = args.len() >= min && max.map_or(true, |m| args.len() <= m);
            if ok {
                Ok(())
            } else {
                Err(StoreError::Remote(format!(
                    "ERR wrong number of arguments for '{}' command",
                    verb.to_ascii_lowercase()
                )))
            }
        };

        match upper.as_str() {
            "PING" => {
                arity(0, Some(1))?;
                Ok(match args.first() {
                    Some(msg) => StoreValue::bulk(msg.as_str()),
                    None => StoreValue::Status("PONG".to_string()),
                })
            }
            "ECHO" => {
                arity(1, Some(1))?;
                Ok(StoreValue::bulk(args[0].as_str()))
            }
            "SET" => {
                arity(2, Some(2))?;
                self.lock().strings.insert(args[0].clone(), args[1].clone());
                Ok(StoreValue::Okay)
            }
            "GET" => {
                arity(1, Some(1))?;
                Ok(self
                    .lock()
                    .strings
                    .get(&args[0])
                    .map(|v| StoreValue::bulk(v.as_str()))
                    .unwrap_or(StoreValue::Nil))
            }
            "DEL" => {
                arity(1, None)?;
                let mut state = self.lock();
                let removed = args
                    .iter()
                    .filter(|k| state.strings.remove(k.as_str()).is_some())
                    .count();
                Ok(StoreValue::Integer(removed as i64))
            }
            "EXISTS" => {
                arity(1, None)?;
                let state = self.lock();
                let found = args
                    .iter()
                    .filter(|k| state.strings.contains_key(k.as_str()))
                    .count();
                Ok(StoreValue::Integer(found as i64))
            }
            "INCR" => {
                arity(1, Some(1))?;
                let mut state = self.lock();
                let current = match state.strings.get(&args[0]) {
                    Some(v) => v.parse::<i64>().map_err(|_| {
                        StoreError::Remote(
                            "ERR value is not an integer or out of range".to_string(),
                        )
                    })?,
                    None => 0,
                };
                let next = current.checked_add(1).ok_or_else(|| {
                    StoreError::Remote("ERR increment or decrement would overflow".to_string())
                })?;
                state.strings.insert(args[0].clone(), next.to_string());
                Ok(StoreValue::Integer(next))
            }
            "KEYS" => {
                arity(1, Some(1))?;
                let pattern = args[0].as_str();
                let state = self.lock();
                let mut keys: Vec<&String> = state
                    .strings
                    .keys()
                    .filter(|k| glob_match(pattern, k))
                    .collect();
                keys.sort();
                Ok(StoreValue::Array(
                    keys.into_iter().map(|k| StoreValue::bulk(k.as_str())).collect(),
                ))
            }
            "PUBLISH" => {
                arity(2, Some(2))?;
                let receivers = self.subscriber_count(&args[0]);
                let _ = self.bus.send(BusItem::Publish {
                    channel: args[0].clone(),
                    payload: args[1].clone(),
                });
                Ok(StoreValue::Integer(receivers as i64))
            }
            _ => Err(StoreError::Remote(format!(
                "ERR unknown command '{}'",
                verb
            ))),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Supports `*` (everything) and a single trailing `*` (prefix match)
fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[async_trait]
impl Connector for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(
        &self,
        endpoint: &str,
        credential: &Credential,
    ) -> Result<Box<dyn StoreConnection>, StoreError> {
        let mut state = self.lock();
        if state.refuse_dials {
            return Err(StoreError::Dial {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        state.dials += 1;

        if !credential.is_empty() {
            state.auth_attempts.push(credential.expose().to_string());
        }

        match (&state.password, credential.is_empty()) {
            (None, true) => {}
            (None, false) => {
                return Err(StoreError::AuthenticationFailed(
                    "ERR AUTH <password> called without any password configured".to_string(),
                ))
            }
            (Some(_), true) => {
                return Err(StoreError::AuthenticationFailed(
                    "NOAUTH Authentication required".to_string(),
                ))
            }
            (Some(expected), false) => {
                if expected != credential.expose() {
                    return Err(StoreError::AuthenticationFailed(
                        "WRONGPASS invalid username-password pair".to_string(),
                    ));
                }
            }
        }
        drop(state);

        Ok(Box::new(MemoryConnection {
            store: self.clone(),
        }))
    }
}

/// Connection handed out by `MemoryStore::connect`
pub struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn execute(&mut self, verb: &str, args: &[String]) -> Result<StoreValue, StoreError> {
        self.store.run(verb, args)
    }

    async fn subscribe(&mut self, channel: &str) -> Result<Box<dyn EventSource>, StoreError> {
        // Receiver first so nothing published after this call is missed
        let events = self.store.bus.subscribe();
        *self
            .store
            .lock()
            .subscribers
            .entry(channel.to_string())
            .or_insert(0) += 1;

        Ok(Box::new(MemorySubscription {
            store: self.store.clone(),
            channel: channel.to_string(),
            events,
            acknowledged: false,
            severed: false,
        }))
    }
}

struct MemorySubscription {
    store: MemoryStore,
    channel: String,
    events: broadcast::Receiver<BusItem>,
    acknowledged: bool,
    severed: bool,
}

#[async_trait]
impl EventSource for MemorySubscription {
    async fn next_event(&mut self) -> Result<SubscriptionEvent, StoreError> {
        if self.severed {
            return Err(StoreError::Closed);
        }
        if !self.acknowledged {
            self.acknowledged = true;
            return Ok(SubscriptionEvent::Subscription {
                kind: "subscribe".to_string(),
                channel: self.channel.clone(),
                count: 1,
            });
        }

        loop {
            match self.events.recv().await {
                Ok(BusItem::Publish { channel, payload }) if channel == self.channel => {
                    return Ok(SubscriptionEvent::Message { channel, payload });
                }
                Ok(BusItem::Publish { .. }) => continue,
                Ok(BusItem::Error { message }) => {
                    return Ok(SubscriptionEvent::Error { message });
                }
                Ok(BusItem::Sever) | Err(broadcast::error::RecvError::Closed) => {
                    self.severed = true;
                    return Err(StoreError::Closed);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Ok(SubscriptionEvent::Error {
                        message: format!("subscriber lagged, {} events dropped", skipped),
                    });
                }
            }
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        if let Some(count) = state.subscribers.get_mut(&self.channel) {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
        assert_eq!(
            conn.execute("set", &args(&["k", "v"])).await.unwrap(),
            StoreValue::Okay
        );
        assert_eq!(
            conn.execute("GET", &args(&["k"])).await.unwrap(),
            StoreValue::bulk("v")
        );
        assert!(conn.execute("GET", &args(&["missing"])).await.unwrap().is_nil());
    }

    #[tokio::test]
    async fn test_unknown_command_is_remote_error() {
        let store = MemoryStore::new();
        let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
        let err = conn.execute("FLY", &[]).await.unwrap_err();
        assert_eq!(err, StoreError::Remote("ERR unknown command 'FLY'".into()));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_wrong_arity() {
        let store = MemoryStore::new();
        let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
        let err = conn.execute("SET", &args(&["only-key"])).await.unwrap_err();
        assert!(err.to_string().contains("wrong number of arguments"));
    }

    #[tokio::test]
    async fn test_incr_and_keys() {
        let store = MemoryStore::new();
        let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
        conn.execute("INCR", &args(&["hits"])).await.unwrap();
        let value = conn.execute("INCR", &args(&["hits"])).await.unwrap();
        assert_eq!(value, StoreValue::Integer(2));

        conn.execute("SET", &args(&["user:1", "a"])).await.unwrap();
        let keys = conn.execute("KEYS", &args(&["user:*"])).await.unwrap();
        assert_eq!(keys.to_string(), "[user:1]");
    }

    #[tokio::test]
    async fn test_incr_overflow_is_remote_error() {
        let store = MemoryStore::new();
        let mut conn = store.connect("h:1", &Credential::default()).await.unwrap();
        let max = i64::MAX.to_string();
        conn.execute("SET", &args(&["n", max.as_str()])).await.unwrap();

        let err = conn.execute("INCR", &args(&["n"])).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Remote("ERR increment or decrement would overflow".into())
        );
        assert_eq!(store.get("n"), Some(max));
    }

    #[tokio::test]
    async fn test_password_is_checked() {
        let store = MemoryStore::new().with_password("right");
        let err = store
            .connect("h:1", &Credential::from("wrong"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::AuthenticationFailed(_)));
        assert!(store.connect("h:1", &Credential::from("right")).await.is_ok());
        assert_eq!(store.auth_attempts(), vec!["wrong", "right"]);
    }

    #[tokio::test]
    async fn test_refused_dial() {
        let store = MemoryStore::new();
        store.refuse_dials(true);
        let err = store
            .connect("h:1", &Credential::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Dial { .. }));
        assert_eq!(store.dial_count(), 0);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*", "abc"));
        assert!(!glob_match("a*", "bc"));
        assert!(glob_match("exact", "exact"));
    }
}
