// ABOUTME: Runs arbitrary store commands against a registered endpoint
// ABOUTME: Leases a pooled connection per call and renders the reply as text

use crate::endpoints::EndpointRegistry;
use crate::error::RelayError;
use redibot_store::StoreValue;
use std::sync::Arc;

/// Executes pass-through commands on behalf of chat users
#[derive(Clone)]
pub struct CommandExecutor {
    registry: Arc<EndpointRegistry>,
}

impl CommandExecutor {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self { registry }
    }

    /// Run `verb args..` on `endpoint` and return the raw reply.
    ///
    /// Every invocation is logged at info level with the endpoint and verb
    /// so that destructive commands leave a trail.
    pub async fn execute(
        &self,
        endpoint: &str,
        verb: &str,
        args: &[String],
    ) -> Result<StoreValue, RelayError> {
        tracing::info!(endpoint = %endpoint, verb = %verb, args = args.len(), "Executing store command");

        let mut lease = self.registry.lease(endpoint).await?;
        lease
            .execute(verb, args)
            .await
            .map_err(|e| RelayError::from_store(endpoint, e))
    }

    /// Same as `execute`, rendered the way replies show it
    pub async fn execute_text(
        &self,
        endpoint: &str,
        verb: &str,
        args: &[String],
    ) -> Result<String, RelayError> {
        self.execute(endpoint, verb, args)
            .await
            .map(|value| value.to_string())
    }
}
