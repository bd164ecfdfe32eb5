// ABOUTME: Backend-neutral reply value returned by generic store commands.
// ABOUTME: Display renders values the way the bot posts them back to chat.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw reply of a generic command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreValue {
    Nil,
    Integer(i64),
    /// Binary-safe string reply
    Bulk(Vec<u8>),
    /// Simple status reply other than OK
    Status(String),
    Okay,
    Array(Vec<StoreValue>),
}

impl StoreValue {
    pub fn bulk(text: impl Into<String>) -> Self {
        StoreValue::Bulk(text.into().into_bytes())
    }

    /// Integer view, also accepting numeric bulk strings
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            StoreValue::Integer(n) => Some(*n),
            StoreValue::Bulk(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, StoreValue::Nil)
    }
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Nil => f.write_str("(nil)"),
            StoreValue::Integer(n) => write!(f, "{}", n),
            StoreValue::Bulk(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            StoreValue::Status(text) => f.write_str(text),
            StoreValue::Okay => f.write_str("OK"),
            StoreValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for StoreValue {
    fn from(n: i64) -> Self {
        StoreValue::Integer(n)
    }
}

impl From<&str> for StoreValue {
    fn from(text: &str) -> Self {
        StoreValue::bulk(text)
    }
}
