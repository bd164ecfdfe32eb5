// ABOUTME: Slack transport over Socket Mode using slack-morphism
// ABOUTME: Forwards messages and app mentions to the dispatcher and posts replies via chat.postMessage

use anyhow::{Context, Result};
use async_trait::async_trait;
use redibot_core::config::SlackConfig;
use redibot_core::{ChatTransport, EventStream, InboundMessage, Reply, TransportError};
use slack_morphism::prelude::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// How many recent event timestamps are remembered for de-duplication
const SEEN_CAPACITY: usize = 256;

type Item = std::result::Result<InboundMessage, TransportError>;

// =============================================================================
// Shared state passed to Socket Mode callbacks via SlackClientEventsUserState
// =============================================================================

/// State shared with Socket Mode callback functions via user state storage.
/// Callbacks are fn pointers (not closures), so they cannot capture variables.
#[derive(Clone)]
struct SlackBridgeState {
    /// Channel for sending inbound lines (or read failures) to the event stream
    tx: Arc<mpsc::Sender<Item>>,
    /// Bot's user ID (to skip self-messages)
    bot_user_id: String,
    /// Recently forwarded message timestamps
    seen: Arc<Mutex<RecentEvents>>,
}

/// Bounded set of recently seen event ids.
///
/// A mention in a channel arrives both as a `message` and as an
/// `app_mention` event; only the first one is forwarded.
#[derive(Debug, Default)]
struct RecentEvents {
    order: VecDeque<String>,
}

impl RecentEvents {
    /// Record `id`, returning false if it was already seen
    fn first_sighting(&mut self, id: &str) -> bool {
        if self.order.iter().any(|seen| seen == id) {
            return false;
        }
        if self.order.len() >= SEEN_CAPACITY {
            self.order.pop_front();
        }
        self.order.push_back(id.to_string());
        true
    }
}

impl SlackBridgeState {
    async fn forward(&self, channel_id: String, sender: String, text: String, ts: String) {
        let fresh = self
            .seen
            .lock()
            .map(|mut seen| seen.first_sighting(&format!("{}:{}", channel_id, ts)))
            .unwrap_or(true);
        if !fresh {
            return;
        }

        let msg = InboundMessage::new(channel_id, sender, text).with_event_id(ts);
        if self.tx.send(Ok(msg)).await.is_err() {
            tracing::warn!(transport = "slack", "Event stream receiver dropped");
        }
    }
}

// =============================================================================
// Socket Mode callback functions (must be fn pointers, not closures)
// =============================================================================

/// Handle push events (messages, app mentions) from Socket Mode
async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bridge = {
        let guard = states.read().await;
        guard
            .get_user_state::<SlackBridgeState>()
            .cloned()
            .ok_or("SlackBridgeState not found in user state")?
    };

    match event.event {
        SlackEventCallbackBody::Message(msg_event) => {
            handle_message_event(&bridge, &msg_event).await;
        }
        SlackEventCallbackBody::AppMention(mention_event) => {
            handle_mention_event(&bridge, &mention_event).await;
        }
        _ => {
            // Ignore other event types
        }
    }
    Ok(())
}

/// Process a Slack message event
async fn handle_message_event(bridge: &SlackBridgeState, msg_event: &SlackMessageEvent) {
    // Edits, joins, bot posts and other subtypes are not commands
    if msg_event.subtype.is_some() {
        return;
    }

    // Skip messages without a user (system messages)
    let Some(sender_id) = msg_event.sender.user.as_ref().map(|u| u.to_string()) else {
        return;
    };
    if sender_id == bridge.bot_user_id {
        return;
    }

    let Some(channel_id) = msg_event.origin.channel.as_ref().map(|c| c.to_string()) else {
        return;
    };

    let text = msg_event
        .content
        .as_ref()
        .and_then(|c| c.text.as_ref())
        .map(|t| t.to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return;
    }

    bridge
        .forward(channel_id, sender_id, text, msg_event.origin.ts.to_string())
        .await;
}

/// Process a Slack app mention event
async fn handle_mention_event(bridge: &SlackBridgeState, mention_event: &SlackAppMentionEvent) {
    let sender_id = mention_event.user.to_string();
    if sender_id == bridge.bot_user_id {
        return;
    }

    let text = mention_event
        .content
        .text
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return;
    }

    bridge
        .forward(
            mention_event.channel.to_string(),
            sender_id,
            text,
            mention_event.origin.ts.to_string(),
        )
        .await;
}

/// Socket Mode error handler; each error counts as a failed read
fn socket_mode_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::error!(transport = "slack", error = %err, "Socket Mode error");

    // Callback is synchronous; skip forwarding rather than block on the lock
    if let Ok(guard) = states.try_read() {
        if let Some(bridge) = guard.get_user_state::<SlackBridgeState>() {
            if bridge.tx.try_send(Err(TransportError(err.to_string()))).is_err() {
                tracing::warn!(transport = "slack", "Could not forward Socket Mode error");
            }
        }
    }
    HttpStatusCode::OK
}

// =============================================================================
// SlackTransport
// =============================================================================

type SocketModeListener = SlackClientSocketModeListener<SlackClientHyperHttpsConnector>;

/// Slack transport using slack-morphism with Socket Mode
pub struct SlackTransport {
    /// Shared Slack client for API calls
    client: Arc<SlackHyperClient>,
    /// Bot OAuth token (xoxb-...) for Web API calls
    bot_token: SlackApiToken,
    /// App-level token (xapp-...) for Socket Mode connections
    app_token: SlackApiToken,
    /// Bot's Slack user ID (resolved via auth.test at startup)
    bot_user_id: String,
    /// Running Socket Mode listener, kept for shutdown
    listener: tokio::sync::Mutex<Option<Arc<SocketModeListener>>>,
}

impl SlackTransport {
    /// Create a new SlackTransport from config.
    ///
    /// Resolves the bot's user ID via the `auth.test` API call.
    pub async fn new(config: &SlackConfig) -> Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("Failed to create Slack HTTP connector")?,
        ));

        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.bot_token.clone()));
        let app_token = SlackApiToken::new(SlackApiTokenValue(config.app_token.clone()));

        let session = client.open_session(&bot_token);
        let auth_response = session
            .auth_test()
            .await
            .context("Failed to call Slack auth.test, check bot_token")?;

        let bot_user_id = auth_response.user_id.to_string();

        tracing::info!(
            bot_user = %bot_user_id,
            team = %auth_response.team,
            "Slack bot authenticated"
        );

        Ok(Self {
            client,
            bot_token,
            app_token,
            bot_user_id,
            listener: tokio::sync::Mutex::new(None),
        })
    }
}

/// Slack rejects empty messages
fn reply_text(text: &str) -> String {
    if text.is_empty() {
        "(empty)".to_string()
    } else {
        text.to_string()
    }
}

#[async_trait]
impl ChatTransport for SlackTransport {
    async fn event_stream(&self) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(256);

        let bridge_state = SlackBridgeState {
            tx: Arc::new(tx),
            bot_user_id: self.bot_user_id.clone(),
            seen: Arc::new(Mutex::new(RecentEvents::default())),
        };

        let socket_mode_callbacks =
            SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        let listener_environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(socket_mode_error_handler)
                .with_user_state(bridge_state),
        );

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment,
            socket_mode_callbacks,
        ));

        // Connections run in the background once listen_for succeeds
        socket_mode_listener
            .listen_for(&self.app_token)
            .await
            .context("Failed to start Socket Mode listener")?;
        tracing::info!(transport = "slack", "Socket Mode connected");

        *self.listener.lock().await = Some(socket_mode_listener);

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn post(&self, reply: &Reply) -> Result<()> {
        let session = self.client.open_session(&self.bot_token);
        let req = SlackApiChatPostMessageRequest::new(
            SlackChannelId::new(reply.channel.clone()),
            SlackMessageContent::new().with_text(reply_text(&reply.text)),
        );
        session
            .chat_post_message(&req)
            .await
            .context("Failed to send Slack message")?;
        Ok(())
    }

    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    fn transport_id(&self) -> &'static str {
        "slack"
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!(transport = "slack", "Shutting down Slack transport");
        if let Some(listener) = self.listener.lock().await.take() {
            listener.shutdown().await;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
