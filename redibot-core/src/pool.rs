// ABOUTME: Bounded per-endpoint connection pool with lease guards and idle eviction
// ABOUTME: Leases release on drop; connections that hit fatal errors are discarded

use crate::error::RelayError;
use crate::metrics;
use redibot_store::{
    Connector, Credential, EventSource, StoreConnection, StoreError, StoreValue,
    SubscriptionEvent,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// Limits applied to every pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum simultaneous leases (including subscriptions)
    pub max_active: usize,
    /// Maximum connections kept for reuse
    pub max_idle: usize,
    /// Idle connections older than this are closed. Zero disables eviction.
    pub idle_timeout: Duration,
    /// Bound on dial + authentication
    pub dial_timeout: Duration,
    /// Bound on each command round trip
    pub io_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 500,
            max_idle: 500,
            idle_timeout: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(300),
            io_timeout: Duration::from_secs(300),
        }
    }
}

struct IdleConnection {
    conn: Box<dyn StoreConnection>,
    returned_at: Instant,
}

/// Connection pool for one endpoint.
///
/// Lease acquisition never waits: when `max_active` leases are out, `get`
/// fails with `PoolExhausted`.
pub struct Pool {
    endpoint: String,
    credential: Credential,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    closed: CancellationToken,
}

impl Pool {
    pub fn new(
        endpoint: impl Into<String>,
        credential: Credential,
        connector: Arc<dyn Connector>,
        config: PoolConfig,
    ) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(config.max_active));
        Arc::new(Self {
            endpoint: endpoint.into(),
            credential,
            connector,
            config,
            permits,
            idle: Mutex::new(VecDeque::new()),
            closed: CancellationToken::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token fired when the pool closes; subscriptions watch it
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.child_token()
    }

    /// Connections currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Leases currently checked out
    pub fn active_count(&self) -> usize {
        self.config
            .max_active
            .saturating_sub(self.permits.available_permits())
    }

    /// Lease a connection, reusing an idle one when possible.
    pub async fn get(self: &Arc<Self>) -> Result<Lease, RelayError> {
        if self.is_closed() {
            return Err(RelayError::PoolClosed(self.endpoint.clone()));
        }

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                metrics::record_error("pool_exhausted");
                return Err(RelayError::PoolExhausted(self.endpoint.clone()));
            }
            Err(TryAcquireError::Closed) => {
                return Err(RelayError::PoolClosed(self.endpoint.clone()));
            }
        };

        if let Some(conn) = self.take_idle() {
            return Ok(Lease::new(Arc::clone(self), conn, permit));
        }

        let dial = self.connector.connect(&self.endpoint, &self.credential);
        let conn = match tokio::time::timeout(self.config.dial_timeout, dial).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Failed to open store connection");
                return Err(RelayError::from_store(&self.endpoint, e));
            }
            Err(_) => {
                tracing::warn!(endpoint = %self.endpoint, "Timed out opening store connection");
                return Err(RelayError::from_store(
                    &self.endpoint,
                    StoreError::Timeout(self.config.dial_timeout),
                ));
            }
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            backend = self.connector.name(),
            "Opened store connection"
        );
        Ok(Lease::new(Arc::clone(self), conn, permit))
    }

    /// Close the pool: drop idle connections, reject new leases, and fire
    /// the closed token. Outstanding leases finish on their own and their
    /// connections are discarded when released.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.permits.close();
        let dropped = {
            let mut idle = self.lock_idle();
            let count = idle.len();
            idle.clear();
            count
        };
        tracing::debug!(endpoint = %self.endpoint, idle_dropped = dropped, "Closed connection pool");
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Most recently returned connection first; stale ones are pruned from the back.
    fn take_idle(&self) -> Option<Box<dyn StoreConnection>> {
        let mut idle = self.lock_idle();
        if !self.config.idle_timeout.is_zero() {
            while idle
                .back()
                .is_some_and(|c| c.returned_at.elapsed() >= self.config.idle_timeout)
            {
                idle.pop_back();
            }
        }
        idle.pop_front().map(|c| c.conn)
    }

    fn put(&self, conn: Box<dyn StoreConnection>) {
        if self.is_closed() {
            return;
        }
        let mut idle = self.lock_idle();
        if idle.len() >= self.config.max_idle {
            return;
        }
        idle.push_front(IdleConnection {
            conn,
            returned_at: Instant::now(),
        });
    }
}

/// Exclusive use of one pooled connection.
///
/// Dropping the lease returns the connection to its pool, unless the pool
/// closed meanwhile or the connection is no longer trustworthy (fatal error,
/// cancelled mid-command, or switched into subscribed mode).
pub struct Lease {
    pool: Arc<Pool>,
    conn: Option<Box<dyn StoreConnection>>,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    fn new(pool: Arc<Pool>, conn: Box<dyn StoreConnection>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            conn: Some(conn),
            reusable: true,
            _permit: permit,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.pool.endpoint()
    }

    /// Run a generic command on the leased connection
    pub async fn execute(&mut self, verb: &str, args: &[String]) -> Result<StoreValue, StoreError> {
        let io_timeout = self.pool.config.io_timeout;
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;

        // Stays false if this future is dropped mid-command
        self.reusable = false;
        let result = match tokio::time::timeout(io_timeout, conn.execute(verb, args)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(io_timeout)),
        };
        self.reusable = !matches!(&result, Err(e) if e.is_fatal());
        result
    }

    /// Publish on the leased connection
    pub async fn publish(&mut self, channel: &str, message: &str) -> Result<i64, StoreError> {
        let io_timeout = self.pool.config.io_timeout;
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;

        self.reusable = false;
        let result = match tokio::time::timeout(io_timeout, conn.publish(channel, message)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(io_timeout)),
        };
        self.reusable = !matches!(&result, Err(e) if e.is_fatal());
        result
    }

    /// Dedicate this lease to a subscription on `channel`.
    ///
    /// The lease (and its slot in the pool) is held until the returned
    /// `SubscribedLease` is dropped; the connection is never reused.
    pub async fn subscribe(mut self, channel: &str) -> Result<SubscribedLease, StoreError> {
        let io_timeout = self.pool.config.io_timeout;
        self.reusable = false;
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;

        let source = match tokio::time::timeout(io_timeout, conn.subscribe(channel)).await {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::Timeout(io_timeout)),
        };
        let pool_closed = self.pool.closed_token();

        Ok(SubscribedLease {
            source,
            pool_closed,
            lease: self,
        })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.reusable {
                self.pool.put(conn);
            }
        }
    }
}

/// A lease whose connection is in subscribed mode
pub struct SubscribedLease {
    source: Box<dyn EventSource>,
    pool_closed: CancellationToken,
    lease: Lease,
}

impl SubscribedLease {
    pub fn endpoint(&self) -> &str {
        self.lease.endpoint()
    }

    /// Fired when the owning pool closes
    pub fn pool_closed(&self) -> CancellationToken {
        self.pool_closed.clone()
    }

    pub async fn next_event(&mut self) -> Result<SubscriptionEvent, StoreError> {
        self.source.next_event().await
    }
}
