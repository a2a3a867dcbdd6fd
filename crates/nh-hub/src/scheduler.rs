//! Scheduled/delayed dispatch releaser (SPEC_FULL.md §4 "Scheduled
//! dispatch"). Modeled on the teacher's `fc-scheduler::PendingJobPoller`
//! poll-filter-dispatch loop: messages not yet eligible are held in memory
//! and an interval tick scans for ones whose eligibility time has arrived,
//! enqueuing exactly those. The queue itself never delays delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nh_common::{Message, QueueMessage};
use nh_queue::Queue;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info};

struct PendingRelease {
    message: Message,
    eligible_at: DateTime<Utc>,
}

/// Holds messages whose `eligible_at` hasn't arrived yet and releases them
/// into the queue once it has.
pub struct Scheduler {
    queue: Arc<dyn Queue>,
    pending: Mutex<Vec<PendingRelease>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn start(queue: Arc<dyn Queue>, poll_interval: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let this = Arc::new(Self {
            queue,
            pending: Mutex::new(Vec::new()),
            shutdown_tx,
        });

        let background = Arc::clone(&this);
        let mut shutdown_rx = this.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        background.release_eligible().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("scheduler poller shutting down");
                        break;
                    }
                }
            }
        });

        this
    }

    /// Submits a message for eventual dispatch. Returns `true` when
    /// `eligible_at` has already passed and the caller should enqueue it
    /// itself immediately; `false` when the scheduler has taken ownership
    /// and will enqueue it once eligible.
    pub fn submit(&self, message: Message, eligible_at: DateTime<Utc>) -> bool {
        if eligible_at <= Utc::now() {
            return true;
        }
        self.pending.lock().push(PendingRelease { message, eligible_at });
        false
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn release_eligible(&self) {
        let now = Utc::now();
        let ready: Vec<Message> = {
            let mut pending = self.pending.lock();
            let drained = std::mem::take(&mut *pending);
            let (ready, still_pending): (Vec<_>, Vec<_>) =
                drained.into_iter().partition(|p| p.eligible_at <= now);
            *pending = still_pending;
            ready.into_iter().map(|p| p.message).collect()
        };

        for message in ready {
            let message_id = message.id.clone();
            let encoded = QueueMessage::new(&message).and_then(|qm| {
                serde_json::to_vec(&qm)
                    .map_err(|e| nh_common::NotifyError::internal(format!("failed to encode queue envelope: {e}")))
            });
            match encoded {
                Ok(bytes) => {
                    if let Err(err) = self.queue.enqueue(bytes).await {
                        error!(message_id, error = %err, "failed to enqueue released scheduled message");
                    }
                }
                Err(err) => error!(message_id, error = %err, "failed to encode scheduled message for release"),
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nh_common::Target;
    use nh_queue::memory::MemoryQueue;

    fn sample_message() -> Message {
        Message::new("hi", "body", vec![Target::new(nh_common::TargetType::Email, "a@x.com")])
    }

    #[tokio::test]
    async fn immediately_eligible_messages_are_not_queued_internally() {
        let queue: Arc<dyn Queue> = MemoryQueue::new(10);
        let scheduler = Scheduler::start(Arc::clone(&queue), Duration::from_millis(20));
        let immediate = scheduler.submit(sample_message(), Utc::now());
        assert!(immediate);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn delayed_message_is_released_once_eligible() {
        let queue: Arc<dyn Queue> = MemoryQueue::new(10);
        let scheduler = Scheduler::start(Arc::clone(&queue), Duration::from_millis(20));
        let held = scheduler.submit(sample_message(), Utc::now() + chrono::Duration::milliseconds(30));
        assert!(!held);
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if queue.size().await.unwrap() > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(scheduler.pending_count(), 0);
    }
}
