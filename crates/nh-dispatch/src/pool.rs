//! Worker pool (spec.md §4.8): a fixed number of tasks pulling from the
//! queue, routing, rate-limiting, and sending. Grounded on the teacher's
//! `ProcessPool` worker-loop shape (semaphore-free here since concurrency
//! is just "how many dequeue loops run", not per-group FIFO fan-out) with
//! its running/draining/stopped state machine folded in directly rather
//! than split into a separate lifecycle type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use nh_common::{DeliveryResult, NotifyError, SendingResults, Target};
use nh_platform::{CircuitBreaker, PlatformRegistry};
use nh_queue::Queue;
use nh_ratelimit::PlatformRateLimiters;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handle::HandleRegistry;
use crate::health::HealthService;
use crate::metrics::DispatchMetrics;
use crate::retry::RetryPolicy;
use crate::router::Router;
use crate::warning::{WarningCategory, WarningSeverity, WarningService};

const STATE_STOPPED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DRAINING: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Stopped,
    Running,
    Draining,
}

impl From<u8> for PoolState {
    fn from(value: u8) -> Self {
        match value {
            STATE_RUNNING => PoolState::Running,
            STATE_DRAINING => PoolState::Draining,
            _ => PoolState::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    /// How long a single `Queue::dequeue` call blocks before polling again.
    pub poll_interval: Duration,
    /// How long a worker waits for a rate limit permit before treating the
    /// send as rate-limited.
    pub rate_limit_wait: Duration,
    pub retry_policy: RetryPolicy,
    /// How long `stop()` waits for in-flight workers before giving up.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_secs(2),
            rate_limit_wait: Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Dispatch pipeline for one deserialized message, shared by every worker.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn Queue>,
    router: Arc<Router>,
    registry: Arc<PlatformRegistry>,
    rate_limiters: Arc<PlatformRateLimiters>,
    circuit_breakers: DashMap<String, Arc<CircuitBreaker>>,
    metrics: Arc<DispatchMetrics>,
    health: Arc<HealthService>,
    warnings: Arc<WarningService>,
    handles: Arc<HandleRegistry>,
    state: AtomicU8,
    active_workers: Arc<AtomicU32>,
    join_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn Queue>,
        router: Arc<Router>,
        registry: Arc<PlatformRegistry>,
        rate_limiters: Arc<PlatformRateLimiters>,
        metrics: Arc<DispatchMetrics>,
        health: Arc<HealthService>,
        warnings: Arc<WarningService>,
        handles: Arc<HandleRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue,
            router,
            registry,
            rate_limiters,
            circuit_breakers: DashMap::new(),
            metrics,
            health,
            warnings,
            handles,
            state: AtomicU8::new(STATE_STOPPED),
            active_workers: Arc::new(AtomicU32::new(0)),
            join_handles: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> PoolState {
        PoolState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn active_workers(&self) -> u32 {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// `stopped -> running` (spec.md §4.8). No-op if already running or draining.
    pub fn start(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(STATE_STOPPED, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!(workers = self.config.worker_count, "worker pool starting");
        let mut handles = self.join_handles.lock();
        for idx in 0..self.config.worker_count {
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move { pool.run_worker(idx).await }));
        }
    }

    /// `running -> draining`: stop pulling new work but let in-flight
    /// attempts finish. Returns once every worker has exited.
    pub async fn drain(&self) {
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_DRAINING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.join_workers().await;
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!("worker pool drained");
    }

    /// `running|draining -> stopped`, bounded by `shutdown_timeout`.
    pub async fn stop(&self) {
        self.state.store(STATE_DRAINING, Ordering::SeqCst);
        let joined = tokio::time::timeout(self.config.shutdown_timeout, self.join_workers()).await;
        if joined.is_err() {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "worker pool shutdown timed out with workers still active"
            );
        }
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
    }

    async fn join_workers(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.join_handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run_worker(self: Arc<Self>, worker_idx: usize) {
        debug!(worker_idx, "worker started");
        loop {
            if self.state() != PoolState::Running {
                break;
            }

            let deadline = Utc::now() + chrono::Duration::from_std(self.config.poll_interval).unwrap_or_default();
            let dequeued = match self.queue.dequeue(deadline).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(err) => {
                    error!(worker_idx, error = %err, "queue dequeue failed");
                    self.warnings.record(
                        WarningCategory::Queue,
                        WarningSeverity::Critical,
                        format!("queue dequeue failed: {err}"),
                        "worker_pool",
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            self.active_workers.fetch_add(1, Ordering::SeqCst);
            self.process_one(dequeued).await;
            self.active_workers.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(worker_idx, "worker exited");
    }

    async fn process_one(&self, dequeued: nh_queue::Dequeued) {
        let queue_message: nh_common::QueueMessage = match serde_json::from_slice(&dequeued.bytes) {
            Ok(m) => m,
            Err(err) => {
                error!(error = %err, "failed to decode queue envelope, dropping");
                let _ = self.queue.ack(&dequeued.id).await;
                return;
            }
        };

        let message = match queue_message.decode_message() {
            Ok(m) => m,
            Err(err) => {
                error!(error = %err, "failed to decode message payload, dropping");
                let _ = self.queue.ack(&dequeued.id).await;
                return;
            }
        };

        let attempt = queue_message.attempts + 1;
        let handle = self.handles.get(&message.id);
        if let Some(handle) = &handle {
            handle.mark_running();
            if handle.is_cancel_requested() {
                let _ = self.queue.ack(&dequeued.id).await;
                handle.mark_cancelled(SendingResults::default());
                self.handles.note_terminal(&message.id);
                return;
            }
        }

        let results = self.run_pipeline(&message, handle.as_ref(), attempt).await;

        if let Err(err) = self.queue.ack(&dequeued.id).await {
            error!(error = %err, "failed to ack completed message");
        }

        self.warn_on_permanent_failures(&message.id, &results);

        if let Some(handle) = &handle {
            handle.complete(SendingResults { results });
            self.handles.note_terminal(&message.id);
        }
    }

    /// Dispatches `message` directly through the same route/rate-limit/send/
    /// retry pipeline the queue-backed path uses, without ever touching the
    /// queue (spec.md §2 "sync: dispatch inline with same worker logic").
    /// Used by `Hub::send` for synchronous, non-delayed sends.
    pub async fn dispatch_inline(&self, message: &nh_common::Message) -> SendingResults {
        let results = self.run_pipeline(message, None, 1).await;
        self.warn_on_permanent_failures(&message.id, &results);
        SendingResults { results }
    }

    /// Routes `message`, then drives rate-limited sends and in-process
    /// retries to completion, returning one `DeliveryResult` per target.
    /// Shared by the queue-backed worker loop and `dispatch_inline` so both
    /// paths apply identical routing, rate limiting, retry, and circuit
    /// breaker behavior (spec.md §4.8).
    async fn run_pipeline(
        &self,
        message: &nh_common::Message,
        handle: Option<&Arc<crate::handle::Handle>>,
        start_attempt: u32,
    ) -> Vec<DeliveryResult> {
        let outcome = self.router.route(message, &self.registry);
        let mut finished: Vec<DeliveryResult> = outcome.unroutable;

        let mut pending: HashMap<String, Vec<Target>> = HashMap::new();
        for routed in outcome.routed {
            pending.entry(routed.platform).or_default().push(routed.target);
        }

        // Retries are driven here rather than via queue redelivery: the
        // in-memory backend's nack is a no-op (nothing to redeliver), and
        // driving attempts in-worker keeps one message's retry sequence
        // uniform across both queue backends (spec.md §4.7).
        let mut retry_attempt = start_attempt;
        while !pending.is_empty() {
            if let Some(handle) = handle {
                if handle.is_cancel_requested() {
                    for (platform, targets) in pending.drain() {
                        for target in targets {
                            finished.push(DeliveryResult::failure(
                                message.id.clone(),
                                target,
                                platform.clone(),
                                &NotifyError::cancelled(),
                                retry_attempt,
                            ));
                        }
                    }
                    break;
                }
            }

            let mut next_round: HashMap<String, Vec<Target>> = HashMap::new();
            for (platform, targets) in pending.drain() {
                let platform_results = self
                    .send_to_platform(message, &platform, targets, retry_attempt)
                    .await;
                for result in platform_results {
                    let retryable = result.error.as_ref().map(|e| e.retryable).unwrap_or(false);
                    if !result.success && retryable && retry_attempt < self.config.retry_policy.max_attempts {
                        next_round.entry(platform.clone()).or_default().push(result.target);
                    } else {
                        // Only terminal outcomes feed metrics/health (spec.md
                        // §4.8): a target retried to success must not also
                        // count as a failure, and a transient failure that's
                        // still retrying must not count yet.
                        self.metrics.record(&platform, result.success, result.duration_ms);
                        self.health.record_outcome(result.success);
                        finished.push(result);
                    }
                }
            }

            if next_round.is_empty() {
                break;
            }
            if let Some(handle) = handle {
                handle.progress(&SendingResults { results: finished.clone() });
            }
            let delay = self.config.retry_policy.next_delay(retry_attempt);
            tokio::time::sleep(delay).await;
            retry_attempt += 1;
            pending = next_round;
        }

        finished
    }

    fn warn_on_permanent_failures(&self, message_id: &str, results: &[DeliveryResult]) {
        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            self.warnings.record(
                WarningCategory::Platform,
                WarningSeverity::Warning,
                format!("{failed} of {} deliveries failed permanently for message {message_id}", results.len()),
                "worker_pool",
            );
        }
    }

    async fn send_to_platform(
        &self,
        message: &nh_common::Message,
        platform: &str,
        targets: Vec<Target>,
        attempt: u32,
    ) -> Vec<DeliveryResult> {
        let breaker = self.circuit_breaker_for(platform);
        if !breaker.allow_request() {
            return targets
                .into_iter()
                .map(|target| {
                    let err = NotifyError::new(nh_common::ErrorCode::ServerError, "circuit breaker open")
                        .with_platform(platform);
                    DeliveryResult::failure(message.id.clone(), target, platform.to_string(), &err, attempt)
                })
                .collect();
        }

        let limiter = self.rate_limiters.get_or_default(platform);
        let deadline = std::time::Instant::now() + self.config.rate_limit_wait;
        if limiter
            .consume_with_deadline(targets.len() as u32, deadline)
            .await
            .is_err()
        {
            return targets
                .into_iter()
                .map(|target| {
                    let err = NotifyError::new(nh_common::ErrorCode::RateLimited, "rate limit wait exceeded")
                        .with_platform(platform);
                    DeliveryResult::failure(message.id.clone(), target, platform.to_string(), &err, attempt)
                })
                .collect();
        }

        let Some(sender) = self.registry.get(platform) else {
            return targets
                .into_iter()
                .map(|target| {
                    let err = NotifyError::no_viable_platform(&target.value).with_platform(platform);
                    DeliveryResult::failure(message.id.clone(), target, platform.to_string(), &err, attempt)
                })
                .collect();
        };

        let start = std::time::Instant::now();
        let mut results = sender.send(message, &targets).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        for result in &mut results {
            result.duration_ms = duration_ms;
            result.attempts = attempt;
        }

        if results.iter().all(|r| r.success) {
            breaker.record_success();
        } else if results.iter().any(|r| !r.success) {
            breaker.record_failure();
        }

        results
    }

    fn circuit_breaker_for(&self, platform: &str) -> Arc<CircuitBreaker> {
        Arc::clone(
            self.circuit_breakers
                .entry(platform.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::default()))
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nh_common::{Message, TargetType};
    use nh_platform::{MockOutcome, MockSender};
    use nh_queue::memory::MemoryQueue;

    fn test_pool(queue: Arc<dyn Queue>, registry: Arc<PlatformRegistry>) -> Arc<WorkerPool> {
        let warnings = Arc::new(WarningService::default());
        let health = Arc::new(HealthService::new(Default::default(), Arc::clone(&warnings)));
        WorkerPool::new(
            WorkerPoolConfig {
                worker_count: 1,
                poll_interval: Duration::from_millis(100),
                rate_limit_wait: Duration::from_millis(200),
                retry_policy: RetryPolicy { max_attempts: 2, ..Default::default() },
                shutdown_timeout: Duration::from_secs(5),
            },
            queue,
            Arc::new(Router::new(vec![])),
            registry,
            Arc::new(PlatformRateLimiters::new(nh_ratelimit::RateLimiterConfig::new(1000.0, 100))),
            Arc::new(DispatchMetrics::new()),
            health,
            warnings,
            Arc::new(HandleRegistry::new(Default::default())),
        )
    }

    #[tokio::test]
    async fn delivers_a_successful_message_and_completes_its_handle() {
        let queue: Arc<dyn Queue> = MemoryQueue::new(10);
        let registry = Arc::new(PlatformRegistry::new());
        registry.register(Arc::new(MockSender::new("email").with_target_types(vec![TargetType::Email])));

        let pool = test_pool(Arc::clone(&queue), registry);
        let message = Message::new("hi", "body", vec![Target::new(TargetType::Email, "a@x.com")]);
        let handle = pool.handles.create(message.id.clone(), None);

        let qm = nh_common::QueueMessage::new(&message).unwrap();
        queue.enqueue(serde_json::to_vec(&qm).unwrap()).await.unwrap();

        pool.start();
        let result = tokio::time::timeout(Duration::from_secs(2), handle.wait()).await.unwrap().unwrap();
        pool.stop().await;

        assert_eq!(result.succeeded(), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds_across_attempts() {
        let queue: Arc<dyn Queue> = MemoryQueue::new(10);
        let registry = Arc::new(PlatformRegistry::new());
        let sender = MockSender::new("email").with_target_types(vec![TargetType::Email]);
        sender.script("a@x.com", MockOutcome::FailThenSucceed(1));
        registry.register(Arc::new(sender));

        let pool = test_pool(Arc::clone(&queue), registry);
        let message = Message::new("hi", "body", vec![Target::new(TargetType::Email, "a@x.com")]);
        let handle = pool.handles.create(message.id.clone(), None);

        let qm = nh_common::QueueMessage::new(&message).unwrap();
        queue.enqueue(serde_json::to_vec(&qm).unwrap()).await.unwrap();

        pool.start();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap().unwrap();
        pool.stop().await;

        assert_eq!(result.succeeded(), 1);
    }

    #[tokio::test]
    async fn partial_failure_does_not_retry_invalid_target() {
        let queue: Arc<dyn Queue> = MemoryQueue::new(10);
        let registry = Arc::new(PlatformRegistry::new());
        let sender = MockSender::new("email").with_target_types(vec![TargetType::Email]);
        sender.script("bad@x.com", MockOutcome::Failure(nh_common::ErrorCode::InvalidTarget));
        registry.register(Arc::new(sender));

        let pool = test_pool(Arc::clone(&queue), registry);
        let message = Message::new(
            "hi",
            "body",
            vec![
                Target::new(TargetType::Email, "a@x.com"),
                Target::new(TargetType::Email, "bad@x.com"),
            ],
        );
        let handle = pool.handles.create(message.id.clone(), None);

        let qm = nh_common::QueueMessage::new(&message).unwrap();
        queue.enqueue(serde_json::to_vec(&qm).unwrap()).await.unwrap();

        pool.start();
        let result = tokio::time::timeout(Duration::from_secs(2), handle.wait()).await.unwrap().unwrap();
        pool.stop().await;

        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.failed(), 1);
        let failed = result.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.error.as_ref().unwrap().code, nh_common::ErrorCode::InvalidTarget.as_str());
        assert_eq!(failed.attempts, 1);
    }
}
