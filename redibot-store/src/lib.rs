// ABOUTME: Pluggable key-value store backend abstraction for redibot.
// ABOUTME: Provides trait-based connectors (Redis, in-memory) with typed values and pub/sub events.

pub mod error;
pub mod event;
pub mod traits;
pub mod value;
pub mod registry;

pub mod backends;

pub use error::StoreError;
pub use event::SubscriptionEvent;
pub use registry::{ConnectorFactory, ConnectorRegistry};
pub use traits::{Connector, Credential, EventSource, StoreConnection};
pub use value::StoreValue;
