//! In-memory queue backend (spec.md §4.4). Backed by a bounded channel for
//! backpressure; `ack`/`nack` are no-ops since a dequeued message has
//! already left the channel and there is no durable replay to update.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant as TokioInstant;

use crate::{Dequeued, Queue, QueueError, QueueHealth, Result};

struct Entry {
    id: String,
    bytes: Vec<u8>,
}

/// Unbounded-by-default in-memory queue. Pass a `capacity` to get
/// bounded backpressure (`enqueue` blocks once full).
pub struct MemoryQueue {
    sender: tokio::sync::mpsc::Sender<Entry>,
    receiver: Mutex<tokio::sync::mpsc::Receiver<Entry>>,
    closed: AtomicBool,
    pending: AtomicU64,
    next_id: AtomicU64,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity.max(1));
        Arc::new(Self {
            sender,
            receiver: Mutex::new(receiver),
            closed: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, bytes: Vec<u8>) -> Result<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sender
            .send(Entry {
                id: id.clone(),
                bytes,
            })
            .await
            .map_err(|_| QueueError::Closed)?;
        self.pending.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn dequeue(&self, deadline: chrono::DateTime<Utc>) -> Result<Option<Dequeued>> {
        let remaining = (deadline - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let timeout_at = TokioInstant::now() + remaining;

        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout_at(timeout_at, receiver.recv()).await {
            Ok(Some(entry)) => {
                self.pending.fetch_sub(1, Ordering::Relaxed);
                Ok(Some(Dequeued {
                    id: entry.id,
                    bytes: entry.bytes,
                }))
            }
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn nack(&self, _id: &str, _next_attempt_at: Option<chrono::DateTime<Utc>>) -> Result<()> {
        Ok(())
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.pending.load(Ordering::Relaxed))
    }

    async fn health(&self) -> QueueHealth {
        if self.closed.load(Ordering::Acquire) {
            QueueHealth::unhealthy("queue is closed")
        } else {
            QueueHealth::healthy()
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let queue = MemoryQueue::new(10);
        let id = queue.enqueue(b"hello".to_vec()).await.unwrap();
        let item = queue
            .dequeue(Utc::now() + chrono::Duration::milliseconds(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.bytes, b"hello");
        assert_ne!(item.id, "");
        assert_eq!(item.id, id);
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let queue = MemoryQueue::new(10);
        let result = queue
            .dequeue(Utc::now() + chrono::Duration::milliseconds(20))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn size_reflects_pending_items() {
        let queue = MemoryQueue::new(10);
        queue.enqueue(b"a".to_vec()).await.unwrap();
        queue.enqueue(b"b".to_vec()).await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 2);
        queue
            .dequeue(Utc::now() + chrono::Duration::milliseconds(50))
            .await
            .unwrap();
        assert_eq!(queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue_and_dequeue() {
        let queue = MemoryQueue::new(10);
        queue.close().await.unwrap();
        assert!(queue.enqueue(b"x".to_vec()).await.is_err());
        assert!(!queue.health().await.healthy);
    }
}
