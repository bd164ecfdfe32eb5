// ABOUTME: Read loop that turns chat lines into relay operations and posts replies
// ABOUTME: Supervises spawned command tasks and tolerates a bounded run of transport read failures

use crate::commands::{parse_message, ParseResult, RelayCommand};
use crate::error::RelayError;
use crate::metrics;
use crate::relay::Relay;
use crate::reply::Reply;
use crate::session::SessionState;
use crate::transport::{ChatTransport, InboundMessage, TransportError};
use redibot_store::Credential;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Configuration for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// The read that makes this many consecutive failures is fatal
    pub max_read_failures: u32,
    /// How long shutdown waits for in-flight tasks before aborting them
    pub shutdown_timeout: Duration,
    /// Allowed sender ids (empty = allow all)
    pub allowed_users: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_read_failures: 10,
            shutdown_timeout: Duration::from_secs(10),
            allowed_users: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Too many consecutive transport read failures
    #[error("giving up after {failures} consecutive transport read failures: {last}")]
    TransportFailed { failures: u32, last: TransportError },

    /// The transport could not provide an event stream at all
    #[error("failed to open transport event stream: {0}")]
    Stream(String),
}

enum Step {
    Shutdown,
    Reaped(Result<(), JoinError>),
    Event(Option<Result<InboundMessage, TransportError>>),
}

/// One dispatch session: a transport, the shared relay, and the session's
/// current endpoint.
pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    relay: Arc<Relay>,
    config: DispatcherConfig,
    session: SessionState,
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        relay: Arc<Relay>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            transport,
            relay,
            config,
            session: SessionState::new(),
            tasks: JoinSet::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token ends `run` gracefully
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Pull events until the stream ends, shutdown is requested, or the
    /// transport fails too many times in a row. Cleans up either way.
    pub async fn run(mut self) -> Result<(), DispatchError> {
        let mut events = match self.transport.event_stream().await {
            Ok(events) => events,
            Err(e) => {
                self.drain().await;
                return Err(DispatchError::Stream(format!("{:#}", e)));
            }
        };

        tracing::info!(
            transport = self.transport.transport_id(),
            bot_user_id = %self.transport.bot_user_id(),
            "Dispatcher started"
        );

        let mut failures: u32 = 0;
        let outcome = loop {
            let step = tokio::select! {
                _ = self.shutdown.cancelled() => Step::Shutdown,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => Step::Reaped(joined),
                event = events.next() => Step::Event(event),
            };

            match step {
                Step::Shutdown => {
                    tracing::info!("Shutdown requested, stopping dispatcher");
                    break Ok(());
                }
                Step::Reaped(joined) => log_task_result(joined),
                Step::Event(None) => {
                    tracing::info!("Transport event stream ended");
                    break Ok(());
                }
                Step::Event(Some(Err(e))) => {
                    failures += 1;
                    metrics::record_error("transport_read");
                    if failures >= self.config.max_read_failures {
                        tracing::error!(failures, error = %e, "Transport read failure limit reached");
                        break Err(DispatchError::TransportFailed { failures, last: e });
                    }
                    tracing::warn!(failures, error = %e, "Transport read failed");
                }
                Step::Event(Some(Ok(msg))) => {
                    failures = 0;
                    self.handle_message(msg).await;
                }
            }
        };

        self.drain().await;
        outcome
    }

    /// Handle one inbound line
    async fn handle_message(&mut self, msg: InboundMessage) {
        // Skip our own messages
        if self.transport.is_self(&msg.sender) {
            return;
        }

        let cmd = match parse_message(&msg.text, self.transport.bot_user_id()) {
            ParseResult::Command(cmd) => cmd,
            ParseResult::Ignore => return,
        };

        // Check allowed users (empty list = allow all)
        if !self.config.allowed_users.is_empty() && !self.config.allowed_users.contains(&msg.sender)
        {
            tracing::debug!(sender = %msg.sender, "User not in allowed list");
            return;
        }

        let command = match cmd.as_relay() {
            Ok(command) => command,
            Err(e) => {
                post_error(self.transport.as_ref(), &msg.channel_id, &e).await;
                return;
            }
        };

        metrics::record_command(command.verb());
        tracing::info!(
            channel = %msg.channel_id,
            sender = %msg.sender,
            verb = command.verb(),
            "Dispatching command"
        );

        match command {
            RelayCommand::Connect {
                endpoint,
                credential,
            } => self.connect(&msg.channel_id, endpoint, credential).await,
            RelayCommand::Disconnect => self.disconnect(&msg.channel_id).await,
            RelayCommand::Unsubscribe { channel } => {
                self.unsubscribe(&msg.channel_id, &channel).await
            }
            RelayCommand::Publish { channel, message } => {
                if let Some(endpoint) = self.routed_endpoint(&msg.channel_id).await {
                    self.spawn_publish(msg.channel_id, endpoint, channel, message);
                }
            }
            RelayCommand::Subscribe { channel } => {
                if let Some(endpoint) = self.routed_endpoint(&msg.channel_id).await {
                    self.spawn_subscribe(msg.channel_id, endpoint, channel);
                }
            }
            RelayCommand::Execute { verb, args } => {
                if let Some(endpoint) = self.routed_endpoint(&msg.channel_id).await {
                    self.spawn_execute(msg.channel_id, endpoint, verb, args);
                }
            }
        }
    }

    /// Current endpoint for a spawned command, or a `NotConnected` reply
    async fn routed_endpoint(&self, reply_to: &str) -> Option<String> {
        match self.session.require_endpoint() {
            Ok(endpoint) => Some(endpoint.to_string()),
            Err(e) => {
                post_error(self.transport.as_ref(), reply_to, &e).await;
                None
            }
        }
    }

    async fn connect(&mut self, reply_to: &str, endpoint: String, credential: Credential) {
        self.relay.registry.register(&endpoint, credential);
        let text = format!("connected to {}", endpoint);
        self.session.set_endpoint(endpoint);
        post_text(self.transport.as_ref(), reply_to, text).await;
    }

    async fn disconnect(&mut self, reply_to: &str) {
        match self.session.clear() {
            Some(endpoint) => {
                self.relay.registry.deregister(&endpoint);
                post_text(
                    self.transport.as_ref(),
                    reply_to,
                    format!("disconnected from {}", endpoint),
                )
                .await;
            }
            None => post_error(self.transport.as_ref(), reply_to, &RelayError::NotConnected).await,
        }
    }

    async fn unsubscribe(&mut self, reply_to: &str, channel: &str) {
        let text = match self.session.require_endpoint() {
            Ok(endpoint) => {
                if self.relay.subscriptions.unsubscribe(endpoint, channel) {
                    format!("unsubscribed from {}", channel)
                } else {
                    format!("no subscription to {}", channel)
                }
            }
            Err(e) => {
                post_error(self.transport.as_ref(), reply_to, &e).await;
                return;
            }
        };
        post_text(self.transport.as_ref(), reply_to, text).await;
    }

    fn spawn_publish(
        &mut self,
        reply_to: String,
        endpoint: String,
        channel: String,
        message: String,
    ) {
        let transport = Arc::clone(&self.transport);
        let relay = Arc::clone(&self.relay);
        self.tasks.spawn(async move {
            // Success is silent; only failures are reported back
            if let Err(e) = relay.publisher.publish(&endpoint, &channel, &message).await {
                post_error(transport.as_ref(), &reply_to, &e).await;
            }
        });
    }

    /// Relay every line of the subscription for as long as it lives
    fn spawn_subscribe(&mut self, reply_to: String, endpoint: String, channel: String) {
        let transport = Arc::clone(&self.transport);
        let relay = Arc::clone(&self.relay);
        self.tasks.spawn(async move {
            let mut subscription = match relay.subscriptions.subscribe(&endpoint, &channel).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    post_error(transport.as_ref(), &reply_to, &e).await;
                    return;
                }
            };

            let mut ended_with_error = false;
            while let Some(line) = subscription.next_line().await {
                ended_with_error = line.starts_with("err: ");
                post_text(transport.as_ref(), &reply_to, line).await;
            }

            // Unsubscribe and shutdown cancel explicitly; anything else ended it underneath us
            if !ended_with_error && !subscription.is_cancelled() {
                post_text(
                    transport.as_ref(),
                    &reply_to,
                    format!("subscription to {} ended", channel),
                )
                .await;
            }
            subscription.finish().await;
        });
    }

    fn spawn_execute(
        &mut self,
        reply_to: String,
        endpoint: String,
        verb: String,
        args: Vec<String>,
    ) {
        let transport = Arc::clone(&self.transport);
        let relay = Arc::clone(&self.relay);
        self.tasks.spawn(async move {
            match relay.executor.execute_text(&endpoint, &verb, &args).await {
                Ok(text) => post_text(transport.as_ref(), &reply_to, text).await,
                Err(e) => post_error(transport.as_ref(), &reply_to, &e).await,
            }
        });
    }

    /// Cancel subscriptions, wait for in-flight tasks, close pools, shut the transport down
    async fn drain(&mut self) {
        self.relay.subscriptions.shutdown();

        let tasks = &mut self.tasks;
        let joined = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                log_task_result(joined);
            }
        })
        .await;

        if joined.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Timed out waiting for command tasks, aborting them"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        self.relay.registry.close_all();

        if let Err(e) = self.transport.shutdown().await {
            tracing::warn!(error = %e, "Transport shutdown failed");
        }
        tracing::info!("Dispatcher stopped");
    }
}

fn log_task_result(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            metrics::record_error("task_panic");
            tracing::error!(error = %e, "Command task panicked");
        }
    }
}

async fn post_text(transport: &dyn ChatTransport, channel: &str, text: String) {
    let reply = Reply::message(channel, text);
    match transport.post(&reply).await {
        Ok(()) => metrics::record_reply(),
        Err(e) => {
            metrics::record_error("post_reply");
            tracing::warn!(channel = %channel, reply_id = reply.id, error = %e, "Failed to post reply");
        }
    }
}

async fn post_error(transport: &dyn ChatTransport, channel: &str, err: &RelayError) {
    metrics::record_error(err.kind());
    tracing::debug!(channel = %channel, error = %err, "Replying with error");
    post_text(transport, channel, err.to_string()).await;
}
