//! The NotifyHub façade (spec.md §4.10): composes every lower crate into the
//! one type an embedding application talks to. Grounded on the teacher's
//! `QueueManager`/`AppState` composition root, which owns exactly these same
//! collaborators (publisher, queue, health, warnings, circuit breakers) and
//! exposes a single start/stop lifecycle over them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::{info, warn};

use nh_common::{ErrorCode, Message, NotifyError, QueueMessage, SendOptions, SendingResults, Target};
use nh_config::{AppConfig, QueueConfig};
use nh_dispatch::{
    Backoff, DispatchMetrics, DispatchMetricsSnapshot, Handle, HandleRegistry, HandleRegistryConfig, HealthReport,
    HealthService, HealthServiceConfig, Jitter, LifecycleConfig, LifecycleManager, PoolState, RetryPolicy, Router,
    WarningService, WarningServiceConfig, WorkerPool, WorkerPoolConfig,
};
use nh_platform::PlatformRegistry;
use nh_queue::memory::MemoryQueue;
use nh_queue::Queue;
use nh_ratelimit::{PlatformRateLimiters, RateLimiterConfig};

use crate::error::HubError;
use crate::options;
use crate::platforms::build_registry;
use crate::scheduler::Scheduler;

/// Owns the full dispatch pipeline: queue, registry, router, rate limiters,
/// worker pool, handle registry, and the observability services that watch
/// them. One `Hub` per process; construct it once from `AppConfig` and call
/// `start`/`stop` around its lifetime.
pub struct Hub {
    queue: Arc<dyn Queue>,
    registry: Arc<PlatformRegistry>,
    router: Arc<Router>,
    rate_limiters: Arc<PlatformRateLimiters>,
    worker_pool: Arc<WorkerPool>,
    handles: Arc<HandleRegistry>,
    health: Arc<HealthService>,
    warnings: Arc<WarningService>,
    metrics: Arc<DispatchMetrics>,
    scheduler: Option<Arc<Scheduler>>,
    lifecycle: LifecycleManager,
}

impl Hub {
    /// Builds every collaborator from `config`, but does not start the
    /// worker pool — call `start` once construction succeeds.
    pub async fn new(config: AppConfig) -> Result<Arc<Self>, HubError> {
        let secrets = nh_secrets::create_provider(&nh_secrets::SecretsConfig {
            provider: config.secrets.provider.clone(),
        })?;

        let registry = Arc::new(build_registry(&config.platforms, &secrets).await);

        let rate_limiters = Arc::new(PlatformRateLimiters::new(RateLimiterConfig::default()));
        for (platform, cfg) in &config.rate_limits {
            rate_limiters.configure(
                platform.clone(),
                RateLimiterConfig {
                    requests_per_second: cfg.requests_per_second,
                    burst_size: cfg.burst_size,
                    enabled: cfg.enabled,
                },
            );
        }
        for platform in registry.platform_names() {
            if config.rate_limits.contains_key(&platform) {
                continue;
            }
            if let Some(sender) = registry.get(&platform) {
                if let Some(default_cfg) = sender.capabilities().default_rate_limit {
                    rate_limiters.configure(platform, default_cfg);
                }
            }
        }

        let queue = build_queue(&config.queue).await?;
        let router = Arc::new(Router::new(config.routing_rules.clone()));

        let retry_policy = RetryPolicy {
            max_attempts: config.retry.max_attempts,
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            backoff: if config.retry.backoff.eq_ignore_ascii_case("linear") {
                Backoff::Linear
            } else {
                Backoff::Exponential
            },
            factor: config.retry.factor,
            jitter: if config.retry.jitter.eq_ignore_ascii_case("none") {
                Jitter::None
            } else {
                Jitter::Full
            },
        };

        let pool_config = WorkerPoolConfig {
            worker_count: config.worker_pool.concurrency,
            poll_interval: Duration::from_millis(config.worker_pool.poll_interval_ms),
            rate_limit_wait: Duration::from_secs(5),
            retry_policy,
            shutdown_timeout: Duration::from_millis(config.worker_pool.shutdown_grace_ms),
        };

        let handles = Arc::new(HandleRegistry::new(HandleRegistryConfig {
            capacity: config.handle_registry.capacity,
            terminal_ttl: Duration::from_secs(config.handle_registry.terminal_ttl_secs),
        }));
        let warnings = Arc::new(WarningService::new(WarningServiceConfig::default()));
        let health = Arc::new(HealthService::new(HealthServiceConfig::default(), Arc::clone(&warnings)));
        let metrics = Arc::new(DispatchMetrics::new());

        let worker_pool = WorkerPool::new(
            pool_config,
            Arc::clone(&queue),
            Arc::clone(&router),
            Arc::clone(&registry),
            Arc::clone(&rate_limiters),
            Arc::clone(&metrics),
            Arc::clone(&health),
            Arc::clone(&warnings),
            Arc::clone(&handles),
        );

        let scheduler = if config.scheduler.enabled {
            Some(Scheduler::start(
                Arc::clone(&queue),
                Duration::from_millis(config.scheduler.poll_interval_ms),
            ))
        } else {
            None
        };

        let lifecycle = LifecycleManager::start(
            Arc::clone(&warnings),
            Arc::clone(&handles),
            LifecycleConfig {
                warning_cleanup_interval: Duration::from_secs(300),
                handle_gc_interval: Duration::from_secs(config.handle_registry.gc_interval_secs),
            },
        );

        Ok(Arc::new(Self {
            queue,
            registry,
            router,
            rate_limiters,
            worker_pool,
            handles,
            health,
            warnings,
            metrics,
            scheduler,
            lifecycle,
        }))
    }

    /// `stopped -> running` for the worker pool (spec.md §5). Idempotent.
    pub fn start(&self) {
        self.worker_pool.start();
        info!("hub started");
    }

    /// Swaps the active routing rules in place (SPEC_FULL.md §4 "Hot
    /// configuration reload"). Takes effect for the next message routed;
    /// in-flight dispatches already holding a `RouteOutcome` are unaffected.
    pub fn reload_routing_rules(&self, rules: Vec<nh_common::RoutingRule>) {
        self.router.reload(rules);
        info!(count = self.router.rules().len(), "routing rules reloaded");
    }

    /// Swaps or adds per-platform rate limit configuration in place. An
    /// absent platform keeps its current limiter untouched.
    pub fn reload_rate_limits(&self, rate_limits: HashMap<String, nh_config::RateLimitConfig>) {
        for (platform, cfg) in rate_limits {
            self.rate_limiters.configure(
                platform,
                RateLimiterConfig {
                    requests_per_second: cfg.requests_per_second,
                    burst_size: cfg.burst_size,
                    enabled: cfg.enabled,
                },
            );
        }
        info!("rate limits reloaded");
    }

    /// Shutdown sequence (spec.md §5): stop pulling new work, close the
    /// queue, then fail every still-pending Handle with `code=shutdown`.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        info!("hub stopping");
        self.worker_pool.stop().await;
        let _ = self.queue.close().await;
        self.handles.cancel_all_pending();
        self.registry.close_all().await;
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
        self.lifecycle.shutdown();
    }

    pub fn state(&self) -> PoolState {
        self.worker_pool.state()
    }

    async fn enqueue(&self, message: &Message) -> Result<(), NotifyError> {
        let envelope = QueueMessage::new(message)?;
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| NotifyError::internal(format!("failed to encode queue envelope: {e}")))?;
        self.queue
            .enqueue(bytes)
            .await
            .map_err(|e| NotifyError::new(ErrorCode::QueueUnavailable, e.to_string()))?;
        Ok(())
    }

    /// Validates, routes eligibility, and either enqueues now or hands the
    /// message to the `Scheduler` for release once `eligible_at` arrives
    /// (spec.md §4.10 `sendAsync`). Returns the handle immediately either way.
    pub async fn send_async(&self, message: Message, options: SendOptions) -> Result<Arc<Handle>, NotifyError> {
        message.validate()?;
        let eligible_at = message.eligible_at(options.scheduled_at);
        let deadline = options
            .timeout_ms
            .map(|ms| Utc::now() + chrono::Duration::milliseconds(ms as i64));
        let handle = self.handles.create(message.id.clone(), deadline);

        let should_enqueue_now = eligible_at <= Utc::now() || self.scheduler.is_none();
        if self.scheduler.is_none() && eligible_at > Utc::now() {
            warn!(message_id = %message.id, "scheduler disabled, dispatching delayed message immediately");
        }

        let outcome = if should_enqueue_now {
            self.enqueue(&message).await
        } else {
            self.scheduler.as_ref().unwrap().submit(message.clone(), eligible_at);
            Ok(())
        };

        if let Err(err) = outcome {
            handle.fail(err.clone());
            self.handles.note_terminal(&message.id);
            return Err(err);
        }
        Ok(handle)
    }

    /// `sync: dispatch inline with same worker logic` when the message is
    /// eligible now and the caller didn't ask for async; otherwise behaves
    /// like `sendAsync` followed by a blocking `wait` (spec.md §4.10 `send`).
    pub async fn send(&self, message: Message, options: SendOptions) -> Result<SendingResults, NotifyError> {
        message.validate()?;
        let eligible_at = message.eligible_at(options.scheduled_at);
        if options.r#async || eligible_at > Utc::now() {
            let handle = self.send_async(message, options).await?;
            handle.wait().await
        } else {
            Ok(self.worker_pool.dispatch_inline(&message).await)
        }
    }

    /// Sends every message concurrently and aggregates their results.
    /// Validation failures short-circuit before any message is dispatched.
    pub async fn send_batch(&self, messages: Vec<Message>, options: SendOptions) -> Result<SendingResults, NotifyError> {
        for message in &messages {
            message.validate()?;
        }
        let sends = messages.into_iter().map(|message| self.send(message, options.clone()));
        let results = try_join_all(sends).await?;
        let results = results.into_iter().flat_map(|r| r.results).collect();
        Ok(SendingResults { results })
    }

    pub async fn quick_send(&self, body: impl Into<String>, target: Target) -> Result<SendingResults, NotifyError> {
        self.send(Message::new("", body, vec![target]), options::sync_options()).await
    }

    pub async fn send_text(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
        targets: Vec<Target>,
    ) -> Result<SendingResults, NotifyError> {
        self.send(Message::new(title, body, targets), options::sync_options()).await
    }

    pub async fn send_alert(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
        targets: Vec<Target>,
    ) -> Result<SendingResults, NotifyError> {
        let mut message = Message::new(title, body, targets);
        message.priority = nh_common::MAX_PRIORITY;
        self.send(message, options::sync_options()).await
    }

    pub fn handle(&self, handle_id: &str) -> Option<Arc<Handle>> {
        self.handles.get(handle_id)
    }

    pub fn cancel(&self, handle_id: &str) -> bool {
        self.handles.get(handle_id).map(|h| h.cancel()).unwrap_or(false)
    }

    pub async fn get_health(&self) -> HealthReport {
        let per_platform = self.registry.health_report().await;
        let queue_health = self.queue.health().await;
        let queue_size = self.queue.size().await.unwrap_or(0);
        self.health.report(queue_health, queue_size, per_platform)
    }

    pub fn get_metrics(&self) -> DispatchMetricsSnapshot {
        self.metrics.snapshot()
    }
}

async fn build_queue(config: &QueueConfig) -> Result<Arc<dyn Queue>, HubError> {
    match config.kind.as_str() {
        "memory" => Ok(MemoryQueue::new(config.memory.capacity)),
        "redis-streams" => build_redis_queue(config).await,
        other => Err(HubError::UnknownQueueKind(other.to_string())),
    }
}

#[cfg(feature = "redis-streams")]
async fn build_redis_queue(config: &QueueConfig) -> Result<Arc<dyn Queue>, HubError> {
    let redis_cfg = &config.redis_streams;
    let backend_config = nh_queue::redis_streams::RedisStreamsConfig {
        stream_name: redis_cfg.stream_name.clone(),
        consumer_group: redis_cfg.consumer_group.clone(),
        consumer_name: if redis_cfg.consumer_name.is_empty() {
            format!("worker-{}", uuid::Uuid::new_v4())
        } else {
            redis_cfg.consumer_name.clone()
        },
        max_len: redis_cfg.max_len,
        claim_min_idle: Duration::from_secs(redis_cfg.claim_min_idle_secs),
        processing_limit: redis_cfg.processing_limit,
    };
    let queue = nh_queue::redis_streams::RedisStreamsQueue::connect(&redis_cfg.addr, backend_config).await?;
    Ok(queue)
}

#[cfg(not(feature = "redis-streams"))]
async fn build_redis_queue(_config: &QueueConfig) -> Result<Arc<dyn Queue>, HubError> {
    Err(HubError::UnknownQueueKind(
        "redis-streams (crate built without the redis-streams feature)".to_string(),
    ))
}
