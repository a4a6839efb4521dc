//! Camera monitor control.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{ErrorResponse, HttpAppError};
use crate::monitor::{CameraStatus, MonitorResponse};
use crate::state::AppState;

/// Start monitoring a camera
///
/// Starting a camera that is already monitored succeeds with
/// `already_running`; at most one session per camera exists.
#[utoipa::path(
    post,
    path = "/monitor/start/{camera_id}",
    tag = "monitor",
    params(("camera_id" = String, Path, description = "Configured camera id")),
    responses(
        (status = 200, description = "started or already_running", body = MonitorResponse),
        (status = 404, description = "Unknown camera", body = ErrorResponse)
    )
)]
pub async fn start_monitor(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> Result<Json<MonitorResponse>, HttpAppError> {
    let status = state.monitors.start(&camera_id).await?;
    Ok(Json(MonitorResponse { status, camera_id }))
}

#[utoipa::path(
    post,
    path = "/monitor/stop/{camera_id}",
    tag = "monitor",
    params(("camera_id" = String, Path, description = "Configured camera id")),
    responses(
        (status = 200, description = "stopped or not_running", body = MonitorResponse),
        (status = 404, description = "Unknown camera", body = ErrorResponse)
    )
)]
pub async fn stop_monitor(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> Result<Json<MonitorResponse>, HttpAppError> {
    let status = state.monitors.stop(&camera_id).await?;
    Ok(Json(MonitorResponse { status, camera_id }))
}

#[utoipa::path(
    get,
    path = "/monitor/status",
    tag = "monitor",
    responses((status = 200, description = "Every configured camera", body = Vec<CameraStatus>))
)]
pub async fn monitor_statuses(State(state): State<Arc<AppState>>) -> Json<Vec<CameraStatus>> {
    Json(state.monitors.statuses().await)
}

#[utoipa::path(
    get,
    path = "/monitor/status/{camera_id}",
    tag = "monitor",
    params(("camera_id" = String, Path, description = "Configured camera id")),
    responses(
        (status = 200, description = "Camera status and statistics", body = CameraStatus),
        (status = 404, description = "Unknown camera", body = ErrorResponse)
    )
)]
pub async fn monitor_status(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> Result<Json<CameraStatus>, HttpAppError> {
    Ok(Json(state.monitors.status(&camera_id).await?))
}
