// ABOUTME: Backend implementations (Redis, in-memory).
// ABOUTME: Each backend implements the Connector trait.

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;
