// ABOUTME: Root library module for the redibot binary
// ABOUTME: Exposes the chat transports and the health server, and re-exports redibot-core

pub mod health;
pub mod platform;

// Re-export platform-agnostic modules from redibot-core
pub use redibot_core::commands;
pub use redibot_core::config;
pub use redibot_core::metrics;

pub use redibot_core::{ChatTransport, Dispatcher, Relay};
pub use redibot_store::ConnectorRegistry;
