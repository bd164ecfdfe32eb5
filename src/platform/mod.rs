// ABOUTME: Chat transport adapters that feed the dispatcher
// ABOUTME: Slack Socket Mode behind the "slack" feature, plus a stdio transport for local use

#[cfg(feature = "slack")]
pub mod slack;
pub mod stdio;

#[cfg(feature = "slack")]
pub use slack::SlackTransport;
pub use stdio::StdioTransport;
