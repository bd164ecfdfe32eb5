// ABOUTME: Error taxonomy for relay operations surfaced to chat users
// ABOUTME: Maps store failures onto endpoint, authentication, and remote-operation errors

use redibot_store::StoreError;
use thiserror::Error;

/// Errors returned by the registry, executor, publisher, and subscription relay.
///
/// None of these are fatal to the process; the dispatcher turns them into
/// reply text.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// No pool exists for the identifier
    #[error("no pool for host {0}")]
    EndpointNotRegistered(String),

    /// The session has not run `connect` yet
    #[error("not connected: use `connect <host:port> [password]` first")]
    NotConnected,

    /// Credential rejected while establishing a pooled connection
    #[error("authentication failed for {endpoint}: {message}")]
    AuthenticationFailed { endpoint: String, message: String },

    /// The store rejected or could not execute the operation
    #[error("{0}")]
    RemoteOperationFailed(#[source] StoreError),

    /// Every lease of the pool is in use
    #[error("connection pool exhausted for {0}")]
    PoolExhausted(String),

    /// The pool was closed (endpoint re-registered or shutting down)
    #[error("connection pool closed for {0}")]
    PoolClosed(String),

    /// A recognized command is missing arguments
    #[error("usage: {0}")]
    Usage(String),
}

impl RelayError {
    /// Classify a store failure that happened while talking to `endpoint`
    pub fn from_store(endpoint: &str, err: StoreError) -> Self {
        match err {
            StoreError::AuthenticationFailed(message) => RelayError::AuthenticationFailed {
                endpoint: endpoint.to_string(),
                message,
            },
            other => RelayError::RemoteOperationFailed(other),
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::EndpointNotRegistered(_) => "endpoint_not_registered",
            RelayError::NotConnected => "not_connected",
            RelayError::AuthenticationFailed { .. } => "authentication_failed",
            RelayError::RemoteOperationFailed(_) => "remote_operation_failed",
            RelayError::PoolExhausted(_) => "pool_exhausted",
            RelayError::PoolClosed(_) => "pool_closed",
            RelayError::Usage(_) => "usage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_is_classified() {
        let err = RelayError::from_store(
            "redis.local:6379",
            StoreError::AuthenticationFailed("WRONGPASS".into()),
        );
        assert!(matches!(
            err,
            RelayError::AuthenticationFailed { ref endpoint, .. } if endpoint == "redis.local:6379"
        ));
        assert_eq!(err.kind(), "authentication_failed");
    }

    #[test]
    fn test_remote_failure_shows_store_message() {
        let err = RelayError::from_store("h:1", StoreError::Remote("ERR syntax error".into()));
        assert_eq!(err.to_string(), "ERR syntax error");
    }

    #[test]
    fn test_not_registered_message() {
        let err = RelayError::EndpointNotRegistered("h:1".into());
        assert_eq!(err.to_string(), "no pool for host h:1");
    }
}
