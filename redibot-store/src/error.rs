// ABOUTME: Error type shared by all store backends.
// ABOUTME: Distinguishes connection-fatal failures from server-side error replies.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while dialing or talking to a key-value store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Transport dial failed (refused, unreachable, DNS)
    #[error("dial {endpoint}: {message}")]
    Dial { endpoint: String, message: String },

    /// The server rejected the credential during the handshake
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server answered with an error reply; the connection is still usable
    #[error("{0}")]
    Remote(String),

    /// Read or write on an established connection failed
    #[error("i/o error: {0}")]
    Io(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The connection (or subscription stream) is gone for good
    #[error("connection closed")]
    Closed,

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("{0} is not supported")]
    Unsupported(String),
}

impl StoreError {
    /// Whether the connection that produced this error must be discarded
    /// instead of going back to a pool.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Timeout(_) | StoreError::Closed
        )
    }
}
