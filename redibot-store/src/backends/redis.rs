// ABOUTME: Redis backend built on the redis crate's async multiplexed connections.
// ABOUTME: Maps redis replies and errors onto StoreValue/StoreError and streams pub/sub messages.

use crate::{
    Connector, Credential, EventSource, StoreConnection, StoreError, StoreValue,
    SubscriptionEvent,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, IntoConnectionInfo, RedisError};
use std::sync::Arc;

const DEFAULT_PORT: u16 = 6379;

/// Connector for real Redis servers
#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::ConnectorFactory {
        Box::new(|_config| Ok(Arc::new(RedisConnector::new())))
    }
}

/// Split "host:port" (port optional) into its parts.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
            (host, port)
        }
        None => (endpoint, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok((host.to_string(), port))
}

fn dial_error(endpoint: &str, err: RedisError) -> StoreError {
    if err.kind() == ErrorKind::AuthenticationFailed {
        return StoreError::AuthenticationFailed(describe(&err));
    }
    StoreError::Dial {
        endpoint: endpoint.to_string(),
        message: describe(&err),
    }
}

fn command_error(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Io(format!("timeout: {}", err))
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Io(describe(&err))
    } else {
        StoreError::Remote(describe(&err))
    }
}

/// Render server errors as "CODE detail", the way the server sent them
fn describe(err: &RedisError) -> String {
    match (err.code(), err.detail()) {
        (Some(code), Some(detail)) => format!("{} {}", code, detail),
        _ => err.to_string(),
    }
}

fn convert(value: redis::Value) -> StoreValue {
    match value {
        redis::Value::Nil => StoreValue::Nil,
        redis::Value::Int(n) => StoreValue::Integer(n),
        redis::Value::BulkString(bytes) => StoreValue::Bulk(bytes),
        redis::Value::SimpleString(text) => StoreValue::Status(text),
        redis::Value::Okay => StoreValue::Okay,
        redis::Value::Array(items) => StoreValue::Array(items.into_iter().map(convert).collect()),
        // RESP3-only shapes are rendered as-is
        other => StoreValue::Status(format!("{:?}", other)),
    }
}

#[async_trait]
impl Connector for RedisConnector {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(
        &self,
        endpoint: &str,
        credential: &Credential,
    ) -> Result<Box<dyn StoreConnection>, StoreError> {
        let (host, port) = parse_endpoint(endpoint)?;
        let mut info = (host, port)
            .into_connection_info()
            .map_err(|e| dial_error(endpoint, e))?;
        // The client sends AUTH right after the TCP dial when a password is set
        if !credential.is_empty() {
            info.redis.password = Some(credential.expose().to_string());
        }

        let client = redis::Client::open(info).map_err(|e| dial_error(endpoint, e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| dial_error(endpoint, e))?;

        tracing::debug!(endpoint = %endpoint, "Redis connection established");

        Ok(Box::new(RedisConnection {
            endpoint: endpoint.to_string(),
            client,
            conn,
        }))
    }
}

/// One authenticated Redis connection
pub struct RedisConnection {
    endpoint: String,
    client: redis::Client,
    conn: MultiplexedConnection,
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn execute(&mut self, verb: &str, args: &[String]) -> Result<StoreValue, StoreError> {
        let mut cmd = redis::cmd(verb);
        for arg in args {
            cmd.arg(arg.as_str());
        }
        let value: redis::Value = cmd.query_async(&mut self.conn).await.map_err(command_error)?;
        Ok(convert(value))
    }

    async fn subscribe(&mut self, channel: &str) -> Result<Box<dyn EventSource>, StoreError> {
        // Multiplexed connections cannot enter subscribed mode; the client
        // carries the same address and credential, so dial a dedicated one.
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| dial_error(&self.endpoint, e))?;
        pubsub.subscribe(channel).await.map_err(command_error)?;

        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            acknowledged: false,
            messages: pubsub.into_on_message().boxed(),
        }))
    }
}

struct RedisSubscription {
    channel: String,
    acknowledged: bool,
    messages: BoxStream<'static, redis::Msg>,
}

#[async_trait]
impl EventSource for RedisSubscription {
    async fn next_event(&mut self) -> Result<SubscriptionEvent, StoreError> {
        // `subscribe` already consumed the server's acknowledgment; a dedicated
        // connection holds exactly one channel, so the count is always 1.
        if !self.acknowledged {
            self.acknowledged = true;
            return Ok(SubscriptionEvent::Subscription {
                kind: "subscribe".to_string(),
                channel: self.channel.clone(),
                count: 1,
            });
        }

        match self.messages.next().await {
            Some(msg) => {
                Ok(message_event(msg.get_channel_name(), msg.get_payload_bytes()))
            }
            None => Err(StoreError::Closed),
        }
    }
}

/// Payloads are arbitrary bytes; decode lossily like bulk replies
fn message_event(channel: &str, payload: &[u8]) -> SubscriptionEvent {
    SubscriptionEvent::Message {
        channel: channel.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_with_port() {
        assert_eq!(
            parse_endpoint("redis.local:6380").unwrap(),
            ("redis.local".to_string(), 6380)
        );
    }

    #[test]
    fn test_parse_endpoint_default_port() {
        assert_eq!(
            parse_endpoint("redis.local").unwrap(),
            ("redis.local".to_string(), 6379)
        );
    }

    #[test]
    fn test_parse_endpoint_rejects_bad_port() {
        let err = parse_endpoint("redis.local:http").unwrap_err();
        assert!(matches!(err, StoreError::InvalidEndpoint { .. }));
        assert!(parse_endpoint(":6379").is_err());
    }

    #[test]
    fn test_binary_payload_is_still_a_message() {
        assert_eq!(
            message_event("news", b"caf\xff"),
            SubscriptionEvent::Message {
                channel: "news".to_string(),
                payload: "caf\u{fffd}".to_string(),
            }
        );
    }

    #[test]
    fn test_convert_values() {
        assert_eq!(convert(redis::Value::Nil), StoreValue::Nil);
        assert_eq!(convert(redis::Value::Int(5)), StoreValue::Integer(5));
        assert_eq!(convert(redis::Value::Okay), StoreValue::Okay);
        assert_eq!(
            convert(redis::Value::Array(vec![
                redis::Value::BulkString(b"a".to_vec()),
                redis::Value::SimpleString("PONG".into()),
            ])),
            StoreValue::Array(vec![StoreValue::bulk("a"), StoreValue::Status("PONG".into())])
        );
    }
}
