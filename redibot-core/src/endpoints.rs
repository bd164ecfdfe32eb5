// ABOUTME: Registry mapping endpoint identifiers to their connection pools
// ABOUTME: Re-registering swaps the pool atomically and closes the old one

use crate::error::RelayError;
use crate::metrics;
use crate::pool::{Lease, Pool, PoolConfig};
use redibot_store::{Connector, Credential};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-wide table of endpoint pools.
///
/// Lookups never block on store I/O; the lock only guards the map.
pub struct EndpointRegistry {
    connector: Arc<dyn Connector>,
    pool_config: PoolConfig,
    pools: RwLock<HashMap<String, Arc<Pool>>>,
}

impl EndpointRegistry {
    pub fn new(connector: Arc<dyn Connector>, pool_config: PoolConfig) -> Self {
        Self {
            connector,
            pool_config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Create (or replace) the pool for `endpoint`.
    ///
    /// No connection is opened here; dial and authentication problems
    /// surface on the first lease. A replaced pool is closed, which also
    /// ends every subscription bound to it.
    pub fn register(&self, endpoint: &str, credential: Credential) -> Arc<Pool> {
        let pool = Pool::new(
            endpoint,
            credential,
            Arc::clone(&self.connector),
            self.pool_config.clone(),
        );

        let (previous, registered) = {
            let mut pools = self.write();
            let previous = pools.insert(endpoint.to_string(), Arc::clone(&pool));
            (previous, pools.len())
        };
        metrics::set_endpoints_registered(registered);

        match previous {
            Some(old) => {
                tracing::info!(endpoint = %endpoint, "Replaced endpoint pool");
                old.close();
            }
            None => tracing::info!(endpoint = %endpoint, "Registered endpoint pool"),
        }
        pool
    }

    /// Current pool for `endpoint`
    pub fn lookup(&self, endpoint: &str) -> Result<Arc<Pool>, RelayError> {
        self.read()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| RelayError::EndpointNotRegistered(endpoint.to_string()))
    }

    /// Look up the pool and lease a connection from it.
    ///
    /// If the pool closed between lookup and lease (a concurrent
    /// re-registration), the lookup is retried once against the new pool.
    pub async fn lease(&self, endpoint: &str) -> Result<Lease, RelayError> {
        let pool = self.lookup(endpoint)?;
        match pool.get().await {
            Err(RelayError::PoolClosed(_)) => {
                let fresh = self.lookup(endpoint)?;
                if Arc::ptr_eq(&fresh, &pool) {
                    return Err(RelayError::PoolClosed(endpoint.to_string()));
                }
                fresh.get().await
            }
            other => other,
        }
    }

    /// Remove and close the pool for `endpoint`. Returns whether one existed.
    pub fn deregister(&self, endpoint: &str) -> bool {
        let (removed, registered) = {
            let mut pools = self.write();
            let removed = pools.remove(endpoint);
            (removed, pools.len())
        };
        metrics::set_endpoints_registered(registered);

        match removed {
            Some(pool) => {
                pool.close();
                tracing::info!(endpoint = %endpoint, "Deregistered endpoint pool");
                true
            }
            None => false,
        }
    }

    /// Registered endpoint identifiers, sorted
    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every pool and empty the registry
    pub fn close_all(&self) {
        let pools: Vec<Arc<Pool>> = self.write().drain().map(|(_, pool)| pool).collect();
        metrics::set_endpoints_registered(0);
        for pool in &pools {
            pool.close();
        }
        if !pools.is_empty() {
            tracing::info!(count = pools.len(), "Closed all endpoint pools");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Pool>>> {
        self.pools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Pool>>> {
        self.pools.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redibot_store::backends::memory::MemoryStore;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(Arc::new(MemoryStore::new()), PoolConfig::default())
    }

    #[test]
    fn test_lookup_unknown_endpoint() {
        let err = registry().lookup("nowhere:1").err().unwrap();
        assert!(matches!(err, RelayError::EndpointNotRegistered(ref e) if e == "nowhere:1"));
    }

    #[test]
    fn test_reregister_closes_previous_pool() {
        let reg = registry();
        let first = reg.register("h:1", Credential::default());
        let second = reg.register("h:1", Credential::default());

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(Arc::ptr_eq(&reg.lookup("h:1").unwrap(), &second));
        assert_eq!(reg.endpoints(), vec!["h:1"]);
    }

    #[test]
    fn test_deregister_and_close_all() {
        let reg = registry();
        let a = reg.register("a:1", Credential::default());
        let b = reg.register("b:1", Credential::default());

        assert!(reg.deregister("a:1"));
        assert!(!reg.deregister("a:1"));
        assert!(a.is_closed());

        reg.close_all();
        assert!(b.is_closed());
        assert!(reg.endpoints().is_empty());
    }
}
