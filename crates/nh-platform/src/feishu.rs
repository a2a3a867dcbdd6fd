//! Feishu (Lark) group-bot webhook Sender (spec.md §1 "Feishu webhook").
//! Feishu's incoming-webhook bots accept a JSON envelope with a `msg_type`
//! discriminator and, when a signing secret is configured on the bot, a
//! `timestamp`+`sign` pair computed from `HMAC-SHA256(key=timestamp+"\n"+secret,
//! msg="")` per Feishu's own custom-bot signing scheme — distinct from the
//! generic `nh_platform::webhook` signature, which is NotifyHub's own. The
//! wire shape below is illustrative, not a specified contract (spec.md §1
//! "Their wire formats are NOT specified here").

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;

use nh_common::{DeliveryResult, ErrorCode, Message, MessageFormat, NotifyError, Target, TargetType};

use crate::circuit_breaker::CircuitBreaker;
use crate::Capabilities;

type HmacSha256 = Hmac<Sha256>;

fn sign(timestamp: i64, secret: &str) -> String {
    let key = format!("{timestamp}\n{secret}");
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(b"");
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct FeishuPayload<'a> {
    msg_type: &'static str,
    content: TextContent<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sign: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct FeishuReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

/// One bot webhook per `Target::value`; `signing_secret` applies to every
/// target sent through this adapter, matching how a single Feishu bot
/// integration is configured with one secret for its one webhook URL.
pub struct FeishuSender {
    name: String,
    client: Client,
    signing_secret: Option<String>,
    breaker: Arc<CircuitBreaker>,
}

impl FeishuSender {
    pub fn new(name: impl Into<String>, signing_secret: Option<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builds with static config"),
            signing_secret,
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    fn body_text(&self, message: &Message) -> String {
        if message.title.is_empty() {
            message.body.clone()
        } else {
            format!("{}\n{}", message.title, message.body)
        }
    }

    async fn send_one(&self, message: &Message, target: &Target) -> DeliveryResult {
        let started = Instant::now();
        if !self.breaker.allow_request() {
            let err = NotifyError::new(ErrorCode::ServerError, "circuit breaker open")
                .with_platform(self.name.clone());
            return with_duration(message, target, &self.name, err, started);
        }

        let text = self.body_text(message);
        let (timestamp, signature) = match &self.signing_secret {
            Some(secret) => {
                let ts = chrono::Utc::now().timestamp();
                (Some(ts.to_string()), Some(sign(ts, secret)))
            }
            None => (None, None),
        };
        let payload = FeishuPayload {
            msg_type: "text",
            content: TextContent { text: &text },
            timestamp,
            sign: signature,
        };

        match self.client.post(&target.value).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                let reply: FeishuReply = resp.json().await.unwrap_or(FeishuReply { code: 0, msg: String::new() });
                if reply.code == 0 {
                    self.breaker.record_success();
                    let mut result =
                        DeliveryResult::success(message.id.clone(), target.clone(), self.name.clone());
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    result
                } else {
                    // Feishu reports application-level failures (bad sign,
                    // rate limited, unknown bot) with HTTP 200 and a nonzero
                    // `code`; treat those as a server error for retry purposes.
                    self.breaker.record_failure();
                    let err = NotifyError::new(ErrorCode::ServerError, reply.msg).with_platform(self.name.clone());
                    with_duration(message, target, &self.name, err, started)
                }
            }
            Ok(resp) => {
                self.breaker.record_failure();
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                let err = NotifyError::from_http_status(status, &self.name, text);
                with_duration(message, target, &self.name, err, started)
            }
            Err(e) => {
                self.breaker.record_failure();
                let code = if e.is_timeout() {
                    ErrorCode::Timeout
                } else if e.is_connect() {
                    ErrorCode::ConnectionFailed
                } else {
                    ErrorCode::SendingFailed
                };
                let err = NotifyError::new(code, e.to_string()).with_platform(self.name.clone());
                with_duration(message, target, &self.name, err, started)
            }
        }
    }
}

fn with_duration(
    message: &Message,
    target: &Target,
    platform: &str,
    err: NotifyError,
    started: Instant,
) -> DeliveryResult {
    let mut result = DeliveryResult::failure(message.id.clone(), target.clone(), platform.to_string(), &err, 1);
    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

#[async_trait]
impl crate::Sender for FeishuSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message, targets: &[Target]) -> Vec<DeliveryResult> {
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            out.push(self.send_one(message, target).await);
        }
        out
    }

    fn validate_target(&self, target: &Target) -> Result<(), NotifyError> {
        target.validate()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported_target_types: vec![TargetType::Group, TargetType::Channel, TargetType::Webhook],
            supported_formats: vec![MessageFormat::Text, MessageFormat::Markdown, MessageFormat::Card],
            max_message_size: 30_000,
            supports_scheduling: false,
            supports_attachments: false,
            supports_mentions: true,
            supports_rich_content: true,
            default_rate_limit: Some(nh_ratelimit::RateLimiterConfig::new(5.0, 5)),
            required_settings: vec![],
        }
    }

    async fn is_healthy(&self) -> Result<(), NotifyError> {
        match self.breaker.state() {
            crate::circuit_breaker::CircuitState::Open => {
                Err(NotifyError::new(ErrorCode::ServerError, "feishu circuit breaker open")
                    .with_platform(self.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sender as _;
    use nh_common::Target;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn msg() -> Message {
        Message::new("alert", "something happened", vec![])
    }

    #[tokio::test]
    async fn posts_and_reports_success_on_code_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0, "msg": "success"})))
            .mount(&server)
            .await;

        let sender = FeishuSender::new("feishu", None);
        let target = Target::new(TargetType::Group, format!("{}/bot", server.uri()));
        let results = sender.send(&msg(), &[target]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn treats_nonzero_application_code_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 19021, "msg": "sign match fail"})))
            .mount(&server)
            .await;

        let sender = FeishuSender::new("feishu", Some("secret".to_string()));
        let target = Target::new(TargetType::Group, format!("{}/bot", server.uri()));
        let results = sender.send(&msg(), &[target]).await;
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn supports_chat_target_types() {
        let sender = FeishuSender::new("feishu", None);
        let caps = sender.capabilities();
        assert!(caps.supports_target_type(TargetType::Group));
        assert!(caps.supports_target_type(TargetType::Channel));
        assert!(!caps.supports_target_type(TargetType::Email));
    }
}
