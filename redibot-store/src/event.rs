// ABOUTME: Event types read from a subscribed store connection.
// ABOUTME: Data messages, subscription acknowledgments, and non-terminal errors.

use serde::{Deserialize, Serialize};

/// One notification read off a subscribed connection.
///
/// Terminal failures are not events: `EventSource::next_event` reports them
/// as `Err(StoreError)` and the source must not be polled again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A payload published to a channel
    Message {
        /// Channel the payload was published on
        channel: String,
        /// Payload as text
        payload: String,
    },

    /// Subscription state change acknowledged by the server
    Subscription {
        /// "subscribe", "unsubscribe", "psubscribe", ...
        kind: String,
        /// Channel the acknowledgment refers to
        channel: String,
        /// Number of channels this connection is now subscribed to
        count: i64,
    },

    /// Something went wrong with a single event; the stream continues
    Error {
        /// Human-readable error message
        message: String,
    },
}
