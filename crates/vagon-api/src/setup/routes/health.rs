//! Health check handlers and response types.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};

use crate::state::AppState;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Run an async check with timeout; returns "healthy", "timeout", or "{prefix}: {error}".
async fn run_check<F, E>(timeout: Duration, f: F, error_prefix: &str) -> String
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, f).await {
        Ok(Ok(())) => "healthy".to_string(),
        Ok(Err(e)) => format!("{}: {}", error_prefix, e),
        Err(_) => "timeout".to_string(),
    }
}

#[derive(serde::Serialize)]
pub(super) struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub database: String,
    pub store_backend: &'static str,
    pub storage: String,
    pub active_cameras: usize,
    pub active_jobs: usize,
    pub websocket_clients: usize,
    pub uptime_secs: u64,
}

/// Liveness check - process is running.
pub async fn liveness_check(_state: Arc<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "alive" })),
    )
}

/// Readiness check - the record store answers.
pub async fn readiness_check(state: Arc<AppState>) -> impl IntoResponse {
    let repository = state.records.repository.clone();
    let database = run_check(TIMEOUT, async move { repository.ping().await }, "not_ready").await;
    let ready = database == "healthy";
    if !ready {
        tracing::error!(database = %database, "Readiness check failed");
    }

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if ready { "ready" } else { "not_ready" },
        "database": if ready { "ready".to_string() } else { database },
    });
    (status_code, Json(body))
}

/// Full health check (record store, storage, monitors and jobs).
pub async fn health_check(state: Arc<AppState>) -> impl IntoResponse {
    let repository = state.records.repository.clone();
    let database = run_check(TIMEOUT, async move { repository.ping().await }, "unhealthy").await;

    let storage = state.uploads.storage.clone();
    let storage = run_check(
        TIMEOUT,
        async move {
            storage
                .exists("health-check-non-existent-key")
                .await
                .map(drop)
        },
        "degraded",
    )
    .await;

    let overall_healthy = database == "healthy";
    let response = HealthCheckResponse {
        status: if overall_healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now(),
        database,
        store_backend: state.records.repository.backend_name(),
        storage,
        active_cameras: state.monitors.active_count().await,
        active_jobs: state.processing.hub.active_jobs(),
        websocket_clients: state.records.broadcaster.client_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    };

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
