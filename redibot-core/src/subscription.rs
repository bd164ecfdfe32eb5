// ABOUTME: Bridges store pub/sub into ordered streams of formatted text lines
// ABOUTME: One dedicated leased connection and one listener task per subscription

use crate::endpoints::EndpointRegistry;
use crate::error::RelayError;
use crate::metrics;
use crate::pool::SubscribedLease;
use futures_util::Stream;
use redibot_store::SubscriptionEvent;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Identity of a subscription: one channel on one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub endpoint: String,
    pub channel: String,
}

impl SubscriptionKey {
    pub fn new(endpoint: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.channel, self.endpoint)
    }
}

/// Render one event as a reply line
pub fn format_event(event: &SubscriptionEvent) -> String {
    match event {
        SubscriptionEvent::Message { channel, payload } => {
            format!("{}: message: {}", channel, payload)
        }
        SubscriptionEvent::Subscription {
            kind,
            channel,
            count,
        } => format!("{}: {} {}", channel, kind, count),
        SubscriptionEvent::Error { message } => format!("err: {}", message),
    }
}

struct ActiveEntry {
    id: u64,
    cancel: CancellationToken,
}

type ActiveMap = Arc<Mutex<HashMap<SubscriptionKey, ActiveEntry>>>;

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<SubscriptionKey, ActiveEntry>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns every live subscription of the process
pub struct SubscriptionRelay {
    registry: Arc<EndpointRegistry>,
    shutdown: CancellationToken,
    active: ActiveMap,
    next_id: AtomicU64,
}

impl SubscriptionRelay {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self {
            registry,
            shutdown: CancellationToken::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to `channel` on `endpoint`.
    ///
    /// The first line is the subscription acknowledgment. The stream ends
    /// when the subscription is cancelled (unsubscribe, re-subscribe,
    /// endpoint replaced, shutdown) or after an `err:` line reporting a
    /// terminal connection error.
    pub async fn subscribe(
        &self,
        endpoint: &str,
        channel: &str,
    ) -> Result<Subscription, RelayError> {
        let lease = self.registry.lease(endpoint).await?;
        let subscribed = lease
            .subscribe(channel)
            .await
            .map_err(|e| RelayError::from_store(endpoint, e))?;

        let key = SubscriptionKey::new(endpoint, channel);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();

        let previous = lock(&self.active).insert(
            key.clone(),
            ActiveEntry {
                id,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::info!(endpoint = %endpoint, channel = %channel, "Replacing existing subscription");
            previous.cancel.cancel();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(listen(
            subscribed,
            tx,
            cancel.clone(),
            key.clone(),
            id,
            Arc::clone(&self.active),
        ));

        tracing::info!(endpoint = %endpoint, channel = %channel, "Subscribed");
        Ok(Subscription {
            key,
            lines: UnboundedReceiverStream::new(rx),
            cancel,
            task: Some(task),
        })
    }

    /// Cancel the subscription for (`endpoint`, `channel`). Returns whether one was live.
    pub fn unsubscribe(&self, endpoint: &str, channel: &str) -> bool {
        let key = SubscriptionKey::new(endpoint, channel);
        match lock(&self.active).remove(&key) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(endpoint = %endpoint, channel = %channel, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Live subscriptions, sorted
    pub fn active(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = lock(&self.active).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cancel every subscription, current and future
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<ActiveEntry> = lock(&self.active).drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.cancel.cancel();
        }
        tracing::debug!(count = drained.len(), "Cancelled all subscriptions");
    }
}

async fn listen(
    mut subscribed: SubscribedLease,
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    key: SubscriptionKey,
    id: u64,
    active: ActiveMap,
) {
    metrics::subscription_opened();
    let pool_closed = subscribed.pool_closed();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(subscription = %key, "Subscription cancelled");
                break;
            }
            _ = pool_closed.cancelled() => {
                tracing::debug!(subscription = %key, "Endpoint pool closed, ending subscription");
                break;
            }
            event = subscribed.next_event() => match event {
                Ok(event) => {
                    if tx.send(format_event(&event)).is_err() {
                        // Nobody is reading anymore
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(subscription = %key, error = %e, "Subscription connection failed");
                    let _ = tx.send(format!("err: {}", e));
                    break;
                }
            }
        }
    }

    {
        let mut map = lock(&active);
        if map.get(&key).is_some_and(|entry| entry.id == id) {
            map.remove(&key);
        }
    }
    metrics::subscription_closed();
    // Dropping the lease here discards the subscribed connection
    drop(subscribed);
}

/// Ordered, unbounded stream of formatted lines from one subscription.
///
/// Dropping it cancels the subscription.
pub struct Subscription {
    key: SubscriptionKey,
    lines: UnboundedReceiverStream<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Next line, or `None` once the subscription has ended
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.next().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the listener task to exit, logging a panic if it had one.
    pub async fn finish(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(subscription = %self.key, error = %e, "Subscription listener panicked");
                }
            }
        }
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        Pin::new(&mut self.lines).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
