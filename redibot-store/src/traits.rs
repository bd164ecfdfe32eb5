// ABOUTME: Core traits that every store backend implements.
// ABOUTME: Connector dials and authenticates, StoreConnection runs commands, EventSource streams pub/sub.

use crate::{StoreError, StoreValue, SubscriptionEvent};
use async_trait::async_trait;
use std::fmt;

/// Opaque secret used for the authentication handshake.
///
/// Never printed: `Debug` is redacted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Access the raw secret. Only backends should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// An empty credential skips the authentication handshake.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Credential(<none>)")
        } else {
            f.write_str("Credential([REDACTED])")
        }
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}

/// Establishes authenticated connections to one kind of store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    /// Dial `endpoint` (host:port), then authenticate with `credential`.
    ///
    /// A rejected credential fails with `StoreError::AuthenticationFailed`
    /// and the half-open connection is dropped.
    async fn connect(
        &self,
        endpoint: &str,
        credential: &Credential,
    ) -> Result<Box<dyn StoreConnection>, StoreError>;
}

/// A single established connection.
#[async_trait]
pub trait StoreConnection: Send {
    /// Run a generic command, e.g. `("SET", ["k", "v"])`.
    async fn execute(&mut self, verb: &str, args: &[String]) -> Result<StoreValue, StoreError>;

    /// Publish `message` on `channel`, returning the number of receivers.
    async fn publish(&mut self, channel: &str, message: &str) -> Result<i64, StoreError> {
        let reply = self
            .execute("PUBLISH", &[channel.to_string(), message.to_string()])
            .await?;
        reply
            .as_integer()
            .ok_or_else(|| StoreError::Remote(format!("unexpected PUBLISH reply: {}", reply)))
    }

    /// Put the connection into subscribed mode for `channel`.
    ///
    /// After this call the connection must not be used for commands again;
    /// callers discard it instead of returning it to a pool.
    async fn subscribe(&mut self, channel: &str) -> Result<Box<dyn EventSource>, StoreError>;
}

/// Ordered stream of events from a subscribed connection.
#[async_trait]
pub trait EventSource: Send {
    /// Read the next event.
    ///
    /// `Err` means the underlying connection is in a permanent error state;
    /// the source yields nothing more after that.
    async fn next_event(&mut self) -> Result<SubscriptionEvent, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("hunter2");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(cred.expose(), "hunter2");
    }

    #[test]
    fn test_empty_credential() {
        assert!(Credential::default().is_empty());
        assert!(!Credential::from("x").is_empty());
        assert_eq!(format!("{:?}", Credential::default()), "Credential(<none>)");
    }
}
