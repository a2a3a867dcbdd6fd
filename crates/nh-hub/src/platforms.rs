//! Builds a `PlatformRegistry` from `AppConfig::platforms`, resolving each
//! adapter's settings through `nh_secrets::Provider` before construction.
//! Grounded on the teacher's adapter-factory pattern: an adapter missing a
//! required setting is skipped with a warning rather than failing the whole
//! Hub (spec.md §4.5 "PlatformRegistry... populated once at startup").

use std::collections::HashMap;
use std::sync::Arc;

use nh_config::PlatformConfig;
use nh_platform::{EmailSender, FeishuSender, MockSender, PlatformRegistry, SmsSender, WebhookSender};
use nh_secrets::Provider;
use tracing::warn;

async fn resolve(settings: &HashMap<String, String>, secrets: &dyn Provider, key: &str) -> Option<String> {
    if let Some(v) = settings.get(key) {
        return Some(v.clone());
    }
    secrets.get(key).await.ok()
}

async fn resolve_all(
    settings: &HashMap<String, String>,
    secrets: &dyn Provider,
    keys: &[&'static str],
) -> Option<HashMap<&'static str, String>> {
    let mut out = HashMap::new();
    for key in keys {
        out.insert(*key, resolve(settings, secrets, key).await?);
    }
    Some(out)
}

pub async fn build_registry(platforms: &HashMap<String, PlatformConfig>, secrets: &Arc<dyn Provider>) -> PlatformRegistry {
    let registry = PlatformRegistry::new();

    for (name, cfg) in platforms {
        if !cfg.enabled {
            continue;
        }
        match name.as_str() {
            "webhook" => {
                let signing_secret = resolve(&cfg.settings, secrets.as_ref(), "signing_secret").await;
                registry.register(Arc::new(WebhookSender::new(name, signing_secret)));
            }
            "feishu" => {
                let signing_secret = resolve(&cfg.settings, secrets.as_ref(), "signing_secret").await;
                registry.register(Arc::new(FeishuSender::new(name, signing_secret)));
            }
            "email" => {
                let required = ["smtp_host", "smtp_port", "smtp_user", "smtp_password", "from_address"];
                match resolve_all(&cfg.settings, secrets.as_ref(), &required).await {
                    Some(values) => {
                        let port: u16 = values["smtp_port"].parse().unwrap_or(587);
                        match EmailSender::new(
                            name,
                            &values["smtp_host"],
                            port,
                            &values["smtp_user"],
                            &values["smtp_password"],
                            &values["from_address"],
                        ) {
                            Ok(sender) => registry.register(Arc::new(sender)),
                            Err(err) => warn!(platform = %name, error = %err, "failed to construct email adapter"),
                        }
                    }
                    None => warn!(platform = %name, "email adapter missing required settings, skipping"),
                }
            }
            "sms" => {
                let required = ["api_base", "account_sid", "auth_token", "from_number"];
                match resolve_all(&cfg.settings, secrets.as_ref(), &required).await {
                    Some(values) => registry.register(Arc::new(SmsSender::new(
                        name,
                        values["api_base"].clone(),
                        values["account_sid"].clone(),
                        values["auth_token"].clone(),
                        values["from_number"].clone(),
                    ))),
                    None => warn!(platform = %name, "sms adapter missing required settings, skipping"),
                }
            }
            "mock" => registry.register(Arc::new(MockSender::new(name))),
            other => warn!(platform = %other, "unknown platform kind in configuration, skipping"),
        }
    }

    registry
}
