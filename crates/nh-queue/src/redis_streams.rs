//! Redis Streams queue backend (spec.md §4.4). One stream per logical
//! queue, a consumer group per deployment, `XREADGROUP` for dequeue and
//! `XACK` on success. A background task reclaims entries that have been
//! pending longer than `claim_min_idle` via `XPENDING` + `XCLAIM` so a
//! crashed worker's messages are picked up elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{Dequeued, Queue, QueueError, QueueHealth, Result};

const FIELD_DATA: &str = "data";
/// How often the background reclaim loop checks for stale pending entries;
/// independent of `claim_min_idle`, which governs how long an entry must
/// have sat unacked before it's eligible to be claimed.
const RECLAIM_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub stream_name: String,
    pub consumer_group: String,
    /// Must be stable across restarts of the same worker replica.
    pub consumer_name: String,
    pub max_len: usize,
    pub claim_min_idle: Duration,
    pub processing_limit: usize,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            stream_name: "notifyhub:dispatch".to_string(),
            consumer_group: "notifyhub".to_string(),
            consumer_name: format!("worker-{}", uuid::Uuid::new_v4()),
            max_len: 100_000,
            claim_min_idle: Duration::from_secs(30),
            processing_limit: 10,
        }
    }
}

/// Whether the backend owns its `ConnectionManager` and must close it, or
/// received one from the caller and must leave it alone (spec.md §4.4/§6).
enum OwnedConnection {
    Owned(ConnectionManager),
    External(ConnectionManager),
}

impl OwnedConnection {
    fn conn(&self) -> ConnectionManager {
        match self {
            OwnedConnection::Owned(c) | OwnedConnection::External(c) => c.clone(),
        }
    }
}

pub struct RedisStreamsQueue {
    config: RedisStreamsConfig,
    conn: OwnedConnection,
    closed: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl RedisStreamsQueue {
    pub async fn connect(addr: &str, config: RedisStreamsConfig) -> Result<Arc<Self>> {
        let client = redis::Client::open(addr).map_err(QueueError::from)?;
        let manager = client.get_connection_manager().await.map_err(QueueError::from)?;
        Self::with_connection_manager(manager, config, true).await
    }

    /// Builds the queue on top of a connection manager supplied by the
    /// caller; `close()` will then not tear it down.
    pub async fn with_external_connection(
        manager: ConnectionManager,
        config: RedisStreamsConfig,
    ) -> Result<Arc<Self>> {
        Self::with_connection_manager(manager, config, false).await
    }

    async fn with_connection_manager(
        manager: ConnectionManager,
        config: RedisStreamsConfig,
        owned: bool,
    ) -> Result<Arc<Self>> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let queue = Self {
            conn: if owned {
                OwnedConnection::Owned(manager)
            } else {
                OwnedConnection::External(manager)
            },
            closed: AtomicBool::new(false),
            config,
            shutdown_tx,
        };
        queue.ensure_group().await?;
        let queue = Arc::new(queue);
        queue.spawn_reclaim_loop();
        Ok(queue)
    }

    /// Background `XPENDING`+`XCLAIM` poller (spec.md §4.4 "Periodically
    /// reclaim pending entries... so that crashed workers' messages are
    /// retried elsewhere"). Runs for the queue's lifetime; stopped by `close`.
    fn spawn_reclaim_loop(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECLAIM_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.reclaim_stale().await {
                            Ok(0) => {}
                            Ok(n) => info!(reclaimed = n, "reclaimed stale pending entries"),
                            Err(err) => warn!(error = %err, "failed to reclaim stale pending entries"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("redis streams reclaim loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.conn();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.config.stream_name, &self.config.consumer_group, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::from(e)),
        }
    }

    /// Reclaims entries idle longer than `claim_min_idle` back onto this
    /// consumer. Intended to run periodically from a background task.
    pub async fn reclaim_stale(&self) -> Result<u64> {
        let mut conn = self.conn.conn();
        let min_idle_ms = self.config.claim_min_idle.as_millis() as usize;

        let pending: redis::streams::StreamPendingCountReply = conn
            .xpending_count(
                &self.config.stream_name,
                &self.config.consumer_group,
                "-",
                "+",
                self.config.processing_limit,
            )
            .await
            .map_err(QueueError::from)?;

        let ids: Vec<String> = pending.ids.into_iter().map(|p| p.id).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let claimed: redis::streams::StreamClaimReply = conn
            .xclaim(
                &self.config.stream_name,
                &self.config.consumer_group,
                &self.config.consumer_name,
                min_idle_ms,
                &ids,
            )
            .await
            .map_err(QueueError::from)?;
        Ok(claimed.ids.len() as u64)
    }
}

#[async_trait]
impl Queue for RedisStreamsQueue {
    async fn enqueue(&self, bytes: Vec<u8>) -> Result<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let mut conn = self.conn.conn();
        let id: String = conn
            .xadd_maxlen(
                &self.config.stream_name,
                redis::streams::StreamMaxlen::Approx(self.config.max_len),
                "*",
                &[(FIELD_DATA, bytes)],
            )
            .await
            .map_err(QueueError::from)?;
        Ok(id)
    }

    async fn dequeue(&self, deadline: chrono::DateTime<Utc>) -> Result<Option<Dequeued>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let block_ms = (deadline - Utc::now())
            .num_milliseconds()
            .clamp(0, i64::from(u32::MAX)) as usize;

        let mut conn = self.conn.conn();
        let opts = redis::streams::StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_name)
            .count(1)
            .block(block_ms);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[&self.config.stream_name], &[">"], &opts)
            .await
            .map_err(QueueError::from)?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let data: Vec<u8> = entry
                    .map
                    .get(FIELD_DATA)
                    .and_then(|v| match v {
                        redis::Value::BulkString(b) => Some(b.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                return Ok(Some(Dequeued {
                    id: entry.id,
                    bytes: data,
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.conn();
        let _: i64 = conn
            .xack(&self.config.stream_name, &self.config.consumer_group, &[id])
            .await
            .map_err(QueueError::from)?;
        Ok(())
    }

    /// No explicit action: an un-acked entry remains pending and is picked
    /// up again by `reclaim_stale` once its idle time exceeds `claim_min_idle`.
    async fn nack(&self, _id: &str, _next_attempt_at: Option<chrono::DateTime<Utc>>) -> Result<()> {
        Ok(())
    }

    async fn size(&self) -> Result<u64> {
        let mut conn = self.conn.conn();
        let len: u64 = conn.xlen(&self.config.stream_name).await.map_err(QueueError::from)?;
        Ok(len)
    }

    async fn health(&self) -> QueueHealth {
        if self.closed.load(Ordering::Acquire) {
            return QueueHealth::unhealthy("queue is closed");
        }
        let mut conn = self.conn.conn();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => QueueHealth::healthy(),
            Err(e) => QueueHealth::unhealthy(e.to_string()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        // An externally-owned connection manager is not torn down here; it
        // is simply an Arc-free clone the caller keeps managing.
        Ok(())
    }
}
