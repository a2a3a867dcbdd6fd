//! FIFO work queue abstraction (spec.md §4.4) with two backends: an
//! in-memory queue for single-process deployments and tests, and a Redis
//! Streams backend for multi-consumer work sharing.
//!
//! The queue never interprets `bytes` — it's a caller-serialized
//! `QueueMessage`; only enqueue/dequeue/ack/nack/size/health/close are
//! queue-level concerns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod error;
pub mod memory;

#[cfg(feature = "redis-streams")]
pub mod redis_streams;

pub use error::QueueError;

pub type Result<T> = std::result::Result<T, QueueError>;

/// A dequeued item paired with the id needed to ack/nack it.
#[derive(Debug, Clone)]
pub struct Dequeued {
    pub id: String,
    pub bytes: Vec<u8>,
}

/// Point-in-time queue health, surfaced through `Hub::getHealth`.
#[derive(Debug, Clone)]
pub struct QueueHealth {
    pub healthy: bool,
    pub detail: Option<String>,
}

impl QueueHealth {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// Abstract FIFO queue (spec.md §4.4). At-least-once delivery: a message
/// remains visible as pending until acked or reclaimed after a nack.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueues a serialized `QueueMessage`, returning a backend-assigned id.
    async fn enqueue(&self, bytes: Vec<u8>) -> Result<String>;

    /// Blocks until a message is available or `deadline` passes.
    async fn dequeue(&self, deadline: DateTime<Utc>) -> Result<Option<Dequeued>>;

    /// Acknowledges successful processing; the message will not be redelivered.
    async fn ack(&self, id: &str) -> Result<()>;

    /// Negative-acknowledges a message; it becomes eligible for redelivery no
    /// earlier than `next_attempt_at`.
    async fn nack(&self, id: &str, next_attempt_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Approximate count of messages awaiting dequeue.
    async fn size(&self) -> Result<u64>;

    async fn health(&self) -> QueueHealth;

    /// Cancels the backend's background work. If the underlying client
    /// (e.g. a Redis connection) was supplied externally, this must not
    /// close it.
    async fn close(&self) -> Result<()>;
}
