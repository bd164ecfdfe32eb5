// ABOUTME: Outbound chat reply with a process-wide increasing message id
// ABOUTME: Serialized as {id, type, channel, text}

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REPLY_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next reply id. Ids start at 1 and strictly increase.
pub fn next_reply_id() -> u64 {
    NEXT_REPLY_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: String,
    pub text: String,
}

impl Reply {
    /// A `message` reply to `channel` with a fresh id
    pub fn message(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: next_reply_id(),
            kind: "message".to_string(),
            channel: channel.into(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let a = Reply::message("C1", "a");
        let b = Reply::message("C1", "b");
        assert!(b.id > a.id);
        assert!(a.id >= 1);
    }

    #[test]
    fn test_serialized_shape() {
        let reply = Reply {
            id: 7,
            kind: "message".into(),
            channel: "C1".into(),
            text: "OK".into(),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "type": "message", "channel": "C1", "text": "OK"})
        );
    }
}
