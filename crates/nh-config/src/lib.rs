//! NotifyHub configuration system.
//!
//! TOML-based configuration with environment variable overrides, mirroring
//! the teacher's `fc-config` crate: a root `AppConfig` loaded from a
//! standard search path (or `NOTIFYHUB_CONFIG`), then patched in place by a
//! fixed set of environment variables (spec.md §6 lists the ones that are
//! part of the contract: `QUEUE_KIND`, `REDIS_ADDR`, `WORKER_COUNT`,
//! `DEFAULT_RETRY_MAX`; the rest follow the same `NOTIFYHUB_*` convention).

use std::collections::HashMap;
use std::path::Path;

use nh_common::RoutingRule;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub queue: QueueConfig,
    pub worker_pool: WorkerPoolConfig,
    pub retry: RetryConfig,
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub platforms: HashMap<String, PlatformConfig>,
    #[serde(rename = "routing_rule")]
    pub routing_rules: Vec<RoutingRule>,
    pub secrets: SecretsConfig,
    pub scheduler: SchedulerConfig,
    pub handle_registry: HandleRegistryConfig,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            queue: QueueConfig::default(),
            worker_pool: WorkerPoolConfig::default(),
            retry: RetryConfig::default(),
            rate_limits: HashMap::new(),
            platforms: HashMap::new(),
            routing_rules: Vec::new(),
            secrets: SecretsConfig::default(),
            scheduler: SchedulerConfig::default(),
            handle_registry: HandleRegistryConfig::default(),
            dev_mode: false,
        }
    }
}

/// Optional HTTP transport surface (§6); `bin/nh-server` binds to this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    /// Bearer token required on `POST /api/v1/notifications`; empty disables auth (dev only).
    pub bearer_token: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            bearer_token: String::new(),
        }
    }
}

/// Queue backend selection (spec.md §4.4/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// `memory` or `redis-streams`.
    pub kind: String,
    pub memory: MemoryQueueConfig,
    pub redis_streams: RedisStreamsConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            memory: MemoryQueueConfig::default(),
            redis_streams: RedisStreamsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQueueConfig {
    pub capacity: usize,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStreamsConfig {
    pub addr: String,
    pub password: String,
    pub db: u8,
    pub stream_name: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub max_len: usize,
    pub claim_min_idle_secs: u64,
    pub processing_limit: usize,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            addr: "redis://localhost:6379".to_string(),
            password: String::new(),
            db: 0,
            stream_name: "notifyhub:dispatch".to_string(),
            consumer_group: "notifyhub".to_string(),
            consumer_name: String::new(),
            max_len: 100_000,
            claim_min_idle_secs: 30,
            processing_limit: 10,
        }
    }
}

/// WorkerPool sizing (spec.md §4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval_ms: 250,
            shutdown_grace_ms: 30_000,
        }
    }
}

/// RetryPolicy defaults (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `exponential` or `linear`.
    pub backoff: String,
    pub factor: f64,
    /// `fullJitter` or `none`.
    pub jitter: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            backoff: "exponential".to_string(),
            factor: 2.0,
            jitter: "fullJitter".to_string(),
        }
    }
}

/// Per-platform token-bucket tunables (spec.md §4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 10,
            enabled: true,
        }
    }
}

/// Per-platform adapter configuration. `settings` is a typed-enough bag for
/// adapter-specific keys (e.g. `smtp_host`, `signing_secret_env`); each
/// adapter owns interpreting its own keys (spec.md §9 "adapters own their
/// decoding"). Missing `required_settings` for an adapter means the
/// PlatformRegistry skips registering it rather than failing startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub enabled: bool,
    pub settings: HashMap<String, String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settings: HashMap::new(),
        }
    }
}

/// Scheduled/delayed dispatch releaser (SPEC_FULL.md §4 "Scheduled dispatch").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 200,
        }
    }
}

/// HandleRegistry bounds (spec.md §4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleRegistryConfig {
    pub capacity: usize,
    pub gc_interval_secs: u64,
    pub terminal_ttl_secs: u64,
}

impl Default for HandleRegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            gc_interval_secs: 60,
            terminal_ttl_secs: 3600,
        }
    }
}

/// Secrets provider selection, handed to `nh_secrets::create_provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub provider: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            provider: "env".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration using the standard search path and environment
    /// overrides (spec.md §6).
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn example_toml() -> String {
        r#"# NotifyHub configuration. Environment variables override these settings:
# QUEUE_KIND, REDIS_ADDR, WORKER_COUNT, DEFAULT_RETRY_MAX plus NOTIFYHUB_*.

[http]
port = 8080
host = "0.0.0.0"
cors_origins = ["*"]
bearer_token = ""

[queue]
kind = "memory"  # memory | redis-streams

[queue.memory]
capacity = 1000

[queue.redis_streams]
addr = "redis://localhost:6379"
stream_name = "notifyhub:dispatch"
consumer_group = "notifyhub"
max_len = 100000
claim_min_idle_secs = 30
processing_limit = 10

[worker_pool]
concurrency = 10
poll_interval_ms = 250
shutdown_grace_ms = 30000

[retry]
max_attempts = 3
base_delay_ms = 200
max_delay_ms = 30000
backoff = "exponential"
factor = 2.0
jitter = "fullJitter"

[rate_limits.webhook]
requests_per_second = 10.0
burst_size = 10

[rate_limits.email]
requests_per_second = 5.0
burst_size = 5

[platforms.webhook]
enabled = true

[platforms.email]
enabled = false

[[routing_rule]]
name = "critical-to-webhook"
priority = 10
enabled = true
conditions = []
actions = []

[scheduler]
enabled = true
poll_interval_ms = 200

[secrets]
provider = "env"

dev_mode = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.queue.kind, "memory");
        assert_eq!(config.worker_pool.concurrency, 10);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn example_toml_parses_back() {
        let toml_str = AppConfig::example_toml();
        let config: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.queue.kind, "memory");
        assert_eq!(config.rate_limits.get("webhook").unwrap().burst_size, 10);
        assert_eq!(config.routing_rules.len(), 1);
    }
}
