// ABOUTME: Chat transport abstraction the dispatcher reads from and replies through
// ABOUTME: Slack and stdio adapters live in the binary crate; tests use a scripted transport

use crate::reply::Reply;
use anyhow::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// Inbound chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The channel this line was posted in; replies go back here
    pub channel_id: String,
    /// User id of the author
    pub sender: String,
    /// Raw text, including any mention prefix
    pub text: String,
    /// Platform-specific event id
    pub event_id: String,
}

impl InboundMessage {
    pub fn new(
        channel_id: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            sender: sender.into(),
            text: text.into(),
            event_id: String::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }
}

/// A failed read from the transport (socket error, malformed frame)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport read failed: {0}")]
pub struct TransportError(pub String);

/// Boxed stream of inbound lines. Ending the stream ends the dispatcher.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, TransportError>> + Send>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Receive inbound lines as a stream
    async fn event_stream(&self) -> Result<EventStream>;

    /// Post a reply to its channel
    async fn post(&self, reply: &Reply) -> Result<()>;

    /// Bot's own user id; lines must start with its mention
    fn bot_user_id(&self) -> &str;

    /// Transport identifier (e.g., "slack", "stdio")
    fn transport_id(&self) -> &'static str;

    /// Check if a user id is the bot itself
    fn is_self(&self, user_id: &str) -> bool {
        user_id == self.bot_user_id()
    }

    /// Gracefully shut down the transport connection
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
