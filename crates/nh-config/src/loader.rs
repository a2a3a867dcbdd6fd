//! Configuration loader: standard file search path plus environment
//! variable overrides (spec.md §6: `QUEUE_KIND`, `REDIS_ADDR`,
//! `WORKER_COUNT`, `DEFAULT_RETRY_MAX` are part of the contract; the rest
//! follow the `NOTIFYHUB_*` convention the teacher's loader uses).

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "notifyhub.toml",
    "config.toml",
    "./config/notifyhub.toml",
    "/etc/notifyhub/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Loads from file (if found) then applies environment overrides. A
    /// missing config file is not an error: `AppConfig::default()` is a
    /// fully functional in-memory-queue, no-senders configuration
    /// (spec.md §6: "None are required for core operation...").
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "loading NotifyHub configuration from file");
                AppConfig::from_file(&path)?
            }
            None => AppConfig::default(),
        };
        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }
        if let Ok(path) = env::var("NOTIFYHUB_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }
        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Contract env vars named explicitly in spec.md §6.
        if let Ok(val) = env::var("QUEUE_KIND") {
            config.queue.kind = val;
        }
        if let Ok(val) = env::var("REDIS_ADDR") {
            config.queue.redis_streams.addr = val;
        }
        if let Ok(val) = env::var("WORKER_COUNT") {
            if let Ok(n) = val.parse() {
                config.worker_pool.concurrency = n;
            }
        }
        if let Ok(val) = env::var("DEFAULT_RETRY_MAX") {
            if let Ok(n) = val.parse() {
                config.retry.max_attempts = n;
            }
        }

        // HTTP
        if let Ok(val) = env::var("NOTIFYHUB_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("NOTIFYHUB_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("NOTIFYHUB_CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = env::var("NOTIFYHUB_BEARER_TOKEN") {
            config.http.bearer_token = val;
        }

        // Queue
        if let Ok(val) = env::var("NOTIFYHUB_QUEUE_MEMORY_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.queue.memory.capacity = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYHUB_REDIS_STREAM_NAME") {
            config.queue.redis_streams.stream_name = val;
        }
        if let Ok(val) = env::var("NOTIFYHUB_REDIS_CONSUMER_GROUP") {
            config.queue.redis_streams.consumer_group = val;
        }
        if let Ok(val) = env::var("NOTIFYHUB_REDIS_CONSUMER_NAME") {
            config.queue.redis_streams.consumer_name = val;
        }

        // Worker pool / retry
        if let Ok(val) = env::var("NOTIFYHUB_WORKER_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.worker_pool.poll_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYHUB_WORKER_SHUTDOWN_GRACE_MS") {
            if let Ok(n) = val.parse() {
                config.worker_pool.shutdown_grace_ms = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYHUB_RETRY_BASE_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.retry.base_delay_ms = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYHUB_RETRY_MAX_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.retry.max_delay_ms = n;
            }
        }

        // Secrets / scheduler / dev mode
        if let Ok(val) = env::var("NOTIFYHUB_SECRETS_PROVIDER") {
            config.secrets.provider = val;
        }
        if let Ok(val) = env::var("NOTIFYHUB_SCHEDULER_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.scheduler.poll_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("NOTIFYHUB_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/path/notifyhub.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.queue.kind, "memory");
    }

    #[test]
    fn loads_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"[queue]
kind = "redis-streams"
"#)
        .unwrap();
        let loader = ConfigLoader::with_path(file.path());
        let config = loader.load().unwrap();
        assert_eq!(config.queue.kind, "redis-streams");
    }

    #[test]
    fn env_override_wins_over_file() {
        std::env::set_var("WORKER_COUNT", "42");
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.worker_pool.concurrency, 42);
        std::env::remove_var("WORKER_COUNT");
    }
}
