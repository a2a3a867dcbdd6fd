//! Generic webhook Sender (spec.md §1 "generic webhook"). POSTs the message
//! to the target's URL; when a signing secret is configured, signs the body
//! with HMAC-SHA256 the same way the teacher's mediator signs outbound
//! mediation calls, under NotifyHub's own header names
//! (SPEC_FULL.md §4 "Webhook signing").

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;

use nh_common::{DeliveryResult, ErrorCode, Message, MessageFormat, NotifyError, Target, TargetType};

use crate::circuit_breaker::CircuitBreaker;
use crate::Capabilities;

pub const SIGNATURE_HEADER: &str = "X-NOTIFYHUB-SIGNATURE";
pub const TIMESTAMP_HEADER: &str = "X-NOTIFYHUB-TIMESTAMP";

type HmacSha256 = Hmac<Sha256>;

fn sign(body: &str, secret: &str) -> (String, String) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    let payload = format!("{timestamp}{body}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    (hex::encode(mac.finalize().into_bytes()), timestamp)
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(rename = "messageId")]
    message_id: &'a str,
    title: &'a str,
    body: &'a str,
    format: MessageFormat,
    #[serde(rename = "cardData", skip_serializing_if = "Option::is_none")]
    card_data: Option<&'a nh_common::CardData>,
}

pub struct WebhookSender {
    name: String,
    client: Client,
    signing_secret: Option<String>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(name: impl Into<String>, signing_secret: Option<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            signing_secret,
            breaker: Arc::new(CircuitBreaker::default()),
            timeout: Duration::from_secs(30),
        }
    }

    async fn send_one(&self, message: &Message, target: &Target) -> DeliveryResult {
        let started = Instant::now();
        if !self.breaker.allow_request() {
            let err = NotifyError::new(ErrorCode::ServerError, "circuit breaker open")
                .with_platform(self.name.clone());
            return failure_with_duration(message, target, &self.name, err, started);
        }

        let payload = WebhookPayload {
            message_id: &message.id,
            title: &message.title,
            body: &message.body,
            format: message.format,
            card_data: message.card_data.as_ref(),
        };
        let body = match serde_json::to_string(&payload) {
            Ok(b) => b,
            Err(e) => {
                let err = NotifyError::internal(format!("failed to serialize webhook payload: {e}"))
                    .with_platform(self.name.clone());
                return failure_with_duration(message, target, &self.name, err, started);
            }
        };

        let mut request = self.client.post(&target.value).timeout(self.timeout).body(body.clone());
        if let Some(secret) = &self.signing_secret {
            let (signature, timestamp) = sign(&body, secret);
            request = request
                .header(SIGNATURE_HEADER, signature)
                .header(TIMESTAMP_HEADER, timestamp);
        }

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    self.breaker.record_success();
                    let mut result =
                        DeliveryResult::success(message.id.clone(), target.clone(), self.name.clone());
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    result
                } else {
                    self.breaker.record_failure();
                    let text = resp.text().await.unwrap_or_default();
                    let err = NotifyError::from_http_status(status.as_u16(), &self.name, text);
                    failure_with_duration(message, target, &self.name, err, started)
                }
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
                failure_with_duration(message, target, &self.name, err, started)
            }
        }
    }
}

fn failure_with_duration(
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
impl crate::Sender for WebhookSender {
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
            supported_target_types: vec![TargetType::Webhook],
            supported_formats: vec![MessageFormat::Text, MessageFormat::Markdown, MessageFormat::Card],
            max_message_size: 1_000_000,
            supports_scheduling: true,
            supports_attachments: false,
            supports_mentions: false,
            supports_rich_content: true,
            default_rate_limit: Some(nh_ratelimit::RateLimiterConfig::new(10.0, 10)),
            required_settings: vec![],
        }
    }

    async fn is_healthy(&self) -> Result<(), NotifyError> {
        match self.breaker.state() {
            crate::circuit_breaker::CircuitState::Open => {
                Err(NotifyError::new(ErrorCode::ServerError, "webhook circuit breaker open")
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
        Message::new("hi", "there", vec![])
    }

    #[tokio::test]
    async fn posts_and_reports_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = WebhookSender::new("webhook", None);
        let target = Target::new(TargetType::Webhook, format!("{}/hook", server.uri()));
        let results = sender.send(&msg(), &[target]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn classifies_5xx_as_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sender = WebhookSender::new("webhook", None);
        let target = Target::new(TargetType::Webhook, format!("{}/hook", server.uri()));
        let results = sender.send(&msg(), &[target]).await;
        let err = results[0].error.as_ref().unwrap();
        assert_eq!(err.code, "serverError");
    }

    #[tokio::test]
    async fn signs_body_when_secret_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = WebhookSender::new("webhook", Some("shh".to_string()));
        let target = Target::new(TargetType::Webhook, format!("{}/hook", server.uri()));
        let results = sender.send(&msg(), &[target]).await;
        assert!(results[0].success);
    }
}
