// ABOUTME: Platform-agnostic relay between chat commands and key-value store endpoints
// ABOUTME: Provides pooling, command execution, pub/sub bridging, and the chat dispatcher

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod publisher;
pub mod relay;
pub mod reply;
pub mod sanitize;
pub mod session;
pub mod subscription;
pub mod testing;
pub mod transport;

pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig};
pub use endpoints::EndpointRegistry;
pub use error::RelayError;
pub use executor::CommandExecutor;
pub use pool::{Lease, Pool, PoolConfig};
pub use publisher::Publisher;
pub use relay::Relay;
pub use reply::Reply;
pub use session::SessionState;
pub use subscription::{Subscription, SubscriptionKey, SubscriptionRelay};
pub use transport::{ChatTransport, EventStream, InboundMessage, TransportError};

// Re-export store types used in public signatures
pub use redibot_store::{Connector, Credential, StoreError, StoreValue};
