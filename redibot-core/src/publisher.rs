// ABOUTME: Publishes chat-supplied messages on a store channel
// ABOUTME: Uses a pooled connection; the receiver count is returned but not echoed to chat

use crate::endpoints::EndpointRegistry;
use crate::error::RelayError;
use std::sync::Arc;

#[derive(Clone)]
pub struct Publisher {
    registry: Arc<EndpointRegistry>,
}

impl Publisher {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self { registry }
    }

    /// Publish `message` on `channel` and return how many subscribers received it
    pub async fn publish(
        &self,
        endpoint: &str,
        channel: &str,
        message: &str,
    ) -> Result<i64, RelayError> {
        let mut lease = self.registry.lease(endpoint).await?;
        let receivers = lease
            .publish(channel, message)
            .await
            .map_err(|e| RelayError::from_store(endpoint, e))?;

        tracing::debug!(endpoint = %endpoint, channel = %channel, receivers, "Published message");
        Ok(receivers)
    }
}
