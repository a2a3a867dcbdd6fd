//! NotifyHub secrets provider.
//!
//! Per-platform credentials (webhook signing secrets, SMTP passwords, SMS
//! API keys) are read through a `Provider` rather than hardcoded into
//! `nh-config`. Only the environment-variable backend is carried here; the
//! trait leaves room for an encrypted-file or vault-backed provider without
//! touching any caller.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

mod env;

pub use env::EnvProvider;

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("invalid key format: {0}")]
    InvalidKey(String),
    #[error("provider error: {0}")]
    ProviderError(String),
}

impl From<&SecretsError> for nh_common::NotifyError {
    fn from(e: &SecretsError) -> Self {
        use nh_common::{ErrorCode, NotifyError};
        match e {
            SecretsError::NotFound(k) => NotifyError::new(ErrorCode::InvalidConfig, format!("secret not found: {k}")),
            _ => NotifyError::new(ErrorCode::InvalidConfig, e.to_string()),
        }
    }
}

/// Configuration for secrets providers.
#[derive(Debug, Clone)]
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

/// Secrets provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, SecretsError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), SecretsError>;
    async fn delete(&self, key: &str) -> Result<(), SecretsError>;
    fn name(&self) -> &str;
}

/// Creates a provider based on configuration.
pub fn create_provider(config: &SecretsConfig) -> Result<Arc<dyn Provider>, SecretsError> {
    match config.provider.as_str() {
        "env" => {
            info!("using environment variable secrets provider");
            Ok(Arc::new(EnvProvider::new()))
        }
        other => Err(SecretsError::ProviderError(format!("unknown provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn env_provider_reads_prefixed_variable() {
        std::env::set_var("NOTIFYHUB_SECRET_WEBHOOK_SIGNING_KEY", "shh");
        let provider = EnvProvider::new();
        let value = provider.get("webhook-signing-key").await.unwrap();
        assert_eq!(value, "shh");
        std::env::remove_var("NOTIFYHUB_SECRET_WEBHOOK_SIGNING_KEY");
    }

    #[tokio::test]
    async fn env_provider_errors_on_missing_key() {
        let provider = EnvProvider::new();
        assert!(provider.get("does-not-exist").await.is_err());
    }

    #[test]
    fn create_provider_rejects_unknown_backend() {
        let config = SecretsConfig {
            provider: "vault".to_string(),
        };
        assert!(create_provider(&config).is_err());
    }
}
