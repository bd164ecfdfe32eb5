// ABOUTME: Line-oriented stdio transport for running the relay without a chat service
// ABOUTME: Every input line is addressed to the bot; replies are written as JSON lines

use anyhow::{Context, Result};
use async_trait::async_trait;
use redibot_core::commands::mention_prefix;
use redibot_core::{ChatTransport, EventStream, InboundMessage, Reply, TransportError};
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

const BOT_ID: &str = "redibot";
const CHANNEL: &str = "stdio";
const SENDER: &str = "local";

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct StdioTransport {
    reader: Mutex<Option<Reader>>,
    writer: tokio::sync::Mutex<Writer>,
}

impl StdioTransport {
    /// Read from stdin, write to stdout
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    pub fn with_io(
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn an input line into a message addressed to the bot
fn addressed(line: &str) -> String {
    let prefix = mention_prefix(BOT_ID);
    if line.starts_with(&prefix) {
        line.to_string()
    } else {
        format!("{} {}", prefix, line)
    }
}

#[async_trait]
impl ChatTransport for StdioTransport {
    async fn event_stream(&self) -> Result<EventStream> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .context("stdio event stream already taken")?;

        let mut line_no: u64 = 0;
        let stream = LinesStream::new(reader.lines()).map(move |line| {
            line_no += 1;
            line.map(|text| {
                InboundMessage::new(CHANNEL, SENDER, addressed(&text))
                    .with_event_id(line_no.to_string())
            })
            .map_err(|e| TransportError(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    async fn post(&self, reply: &Reply) -> Result<()> {
        let mut line = serde_json::to_vec(reply).context("Failed to encode reply")?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await.context("Failed to write reply")?;
        writer.flush().await.context("Failed to flush reply")?;
        Ok(())
    }

    fn bot_user_id(&self) -> &str {
        BOT_ID
    }

    fn transport_id(&self) -> &'static str {
        "stdio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressed_prepends_mention_once() {
        assert_eq!(addressed("GET k"), "<@redibot> GET k");
        assert_eq!(addressed("<@redibot> GET k"), "<@redibot> GET k");
    }

    #[tokio::test]
    async fn test_lines_become_messages() {
        let input: &[u8] = b"connect h:1\nGET k\n";
        let transport = StdioTransport::with_io(input, tokio::io::sink());

        let mut events = transport.event_stream().await.unwrap();
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.text, "<@redibot> connect h:1");
        assert_eq!(first.channel_id, "stdio");
        assert_eq!(first.event_id, "1");

        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.text, "<@redibot> GET k");
        assert!(events.next().await.is_none());

        assert!(transport.event_stream().await.is_err());
    }
}
