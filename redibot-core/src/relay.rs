// ABOUTME: Bundles the registry, executor, publisher, and subscription relay
// ABOUTME: Built once per process and shared by the dispatcher's tasks

use crate::endpoints::EndpointRegistry;
use crate::executor::CommandExecutor;
use crate::pool::PoolConfig;
use crate::publisher::Publisher;
use crate::subscription::SubscriptionRelay;
use redibot_store::Connector;
use std::sync::Arc;

pub struct Relay {
    pub registry: Arc<EndpointRegistry>,
    pub executor: CommandExecutor,
    pub publisher: Publisher,
    pub subscriptions: SubscriptionRelay,
}

impl Relay {
    pub fn new(connector: Arc<dyn Connector>, pool_config: PoolConfig) -> Self {
        let registry = Arc::new(EndpointRegistry::new(connector, pool_config));
        Self {
            executor: CommandExecutor::new(Arc::clone(&registry)),
            publisher: Publisher::new(Arc::clone(&registry)),
            subscriptions: SubscriptionRelay::new(Arc::clone(&registry)),
            registry,
        }
    }
}
