// ABOUTME: Scripted in-memory chat transport for driving the dispatcher in tests
// ABOUTME: Lines and read failures are pushed in; posted replies are recorded

use crate::reply::Reply;
use crate::transport::{ChatTransport, EventStream, InboundMessage, TransportError};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

type Item = Result<InboundMessage, TransportError>;

/// Chat transport whose inbound side is fed by the test.
///
/// Clones share state, so a test can keep one handle while the dispatcher
/// owns another.
#[derive(Clone)]
pub struct ScriptedTransport {
    bot_id: String,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Item>>>>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Item>>>>,
    replies: Arc<Mutex<Vec<Reply>>>,
    posted: Arc<Notify>,
    shutdowns: Arc<Mutex<usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScriptedTransport {
    pub fn new(bot_id: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            bot_id: bot_id.to_string(),
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(Mutex::new(Some(rx))),
            replies: Arc::new(Mutex::new(Vec::new())),
            posted: Arc::new(Notify::new()),
            shutdowns: Arc::new(Mutex::new(0)),
        }
    }

    /// Queue a line from `sender` in `channel`
    pub fn push_message(&self, channel: &str, sender: &str, text: &str) {
        self.push(Ok(InboundMessage::new(channel, sender, text)));
    }

    /// Queue a line in channel "C1" from user "U100"
    pub fn push_line(&self, text: &str) {
        self.push_message("C1", "U100", text);
    }

    /// Queue a read failure
    pub fn push_failure(&self, message: &str) {
        self.push(Err(TransportError(message.to_string())));
    }

    /// End the inbound stream after everything queued so far
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    /// Replies posted so far
    pub fn replies(&self) -> Vec<Reply> {
        lock(&self.replies).clone()
    }

    /// Reply texts posted so far
    pub fn reply_texts(&self) -> Vec<String> {
        lock(&self.replies).iter().map(|r| r.text.clone()).collect()
    }

    /// Wait until at least `count` replies have been posted, or `timeout` passes.
    /// Returns whatever was posted by then.
    pub async fn wait_for_replies(&self, count: usize, timeout: Duration) -> Vec<Reply> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.posted.notified();
            let current = self.replies();
            if current.len() >= count {
                return current;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.replies();
            }
        }
    }

    /// How many times `shutdown` was called
    pub fn shutdown_count(&self) -> usize {
        *lock(&self.shutdowns)
    }

    fn push(&self, item: Item) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(item);
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn event_stream(&self) -> Result<EventStream> {
        let rx = lock(&self.rx)
            .take()
            .ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn post(&self, reply: &Reply) -> Result<()> {
        lock(&self.replies).push(reply.clone());
        self.posted.notify_waiters();
        Ok(())
    }

    fn bot_user_id(&self) -> &str {
        &self.bot_id
    }

    fn transport_id(&self) -> &'static str {
        "scripted"
    }

    async fn shutdown(&self) -> Result<()> {
        *lock(&self.shutdowns) += 1;
        Ok(())
    }
}
