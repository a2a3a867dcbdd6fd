//! NotifyHub server binary: loads configuration, builds a `Hub`, and
//! exposes the optional HTTP surface (spec.md §6) on top of it —
//! `POST /api/v1/notifications`, `GET /health`, `GET /metrics`.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use nh_common::{Message, NotifyError, SendOptions};
use nh_config::AppConfig;
use nh_hub::Hub;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    bearer_token: Arc<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    nh_common::logging::init_logging("notifyhub");

    let config = AppConfig::load().context("failed to load NotifyHub configuration")?;
    let http_config = config.http.clone();

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let hub = Hub::new(config).await.context("failed to construct Hub")?;
    hub.start();
    info!("notifyhub started");

    let state = AppState {
        hub: Arc::clone(&hub),
        bearer_token: Arc::new(http_config.bearer_token.clone()),
    };

    let app = Router::new()
        .route("/api/v1/notifications", post(send_notification))
        .route("/health", get(health_handler))
        .route("/metrics", get(move || metrics_handler(prometheus_handle.clone())))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", http_config.host, http_config.port);
    let listener = TcpListener::bind(&addr).await.context("failed to bind HTTP listener")?;
    info!(addr = %addr, "listening for HTTP requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("shutting down notifyhub");
    hub.stop().await;
    info!("notifyhub shutdown complete");
    Ok(())
}

fn error_response(err: &NotifyError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(serde_json::json!({
            "code": err.code_str(),
            "category": err.category.to_string(),
            "message": err.message,
        })),
    )
        .into_response()
}

async fn send_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Message>, JsonRejection>,
) -> Response {
    if !state.bearer_token.is_empty() {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(state.bearer_token.as_str()) {
            return error_response(&NotifyError::new(nh_common::ErrorCode::Unauthorized, "missing or invalid bearer token"));
        }
    }

    let message = match body {
        Ok(Json(message)) => message,
        Err(JsonRejection::MissingJsonContentType(_)) => {
            return (StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(serde_json::json!({
                "code": "invalidMessage",
                "message": "expected content-type: application/json",
            })))
                .into_response();
        }
        Err(err) => {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({
                "code": "invalidMessage",
                "message": err.to_string(),
            })))
                .into_response();
        }
    };

    match state.hub.send(message, SendOptions::default()).await {
        Ok(results) => (StatusCode::OK, Json(results)).into_response(),
        Err(err) => {
            error!(error = %err, "notification dispatch failed");
            error_response(&err)
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let report = state.hub.get_health().await;
    let status = match report.status {
        nh_hub::HealthStatus::Healthy | nh_hub::HealthStatus::Degraded => StatusCode::OK,
        nh_hub::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(serde_json::json!({
            "status": format!("{:?}", report.status).to_uppercase(),
            "queueHealthy": report.queue_healthy,
            "queueSize": report.queue_size,
            "successRate": report.success_rate,
            "uptimeSecs": report.uptime.as_secs(),
            "platforms": report.per_platform.iter().map(|(k, v)| (k.clone(), v.is_ok())).collect::<std::collections::HashMap<_, _>>(),
        })),
    )
        .into_response()
}

async fn metrics_handler(prometheus_handle: metrics_exporter_prometheus::PrometheusHandle) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        prometheus_handle.render(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
