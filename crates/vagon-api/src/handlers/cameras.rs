//! Configured cameras and host capture capabilities.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;
use vagon_core::models::CameraConfig;
use vagon_core::AppError;
use vagon_infra::{detect_video_devices, SystemInfo};

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct CameraEntry {
    #[serde(flatten)]
    pub config: CameraConfig,
    pub is_running: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CameraSystemInfo {
    #[serde(flatten)]
    pub system: SystemInfo,
    /// Capture devices present on the host, e.g. `/dev/video0`
    pub detected_devices: Vec<String>,
    pub ffmpeg_available: bool,
    pub configured_cameras: usize,
    pub active_monitors: usize,
}

#[utoipa::path(
    get,
    path = "/cameras/list",
    tag = "cameras",
    responses((status = 200, description = "Configured cameras", body = Vec<CameraEntry>))
)]
pub async fn list_cameras(State(state): State<Arc<AppState>>) -> Json<Vec<CameraEntry>> {
    let statuses = state.monitors.statuses().await;
    let entries = state
        .monitors
        .cameras()
        .into_iter()
        .map(|config| {
            let is_running = statuses
                .iter()
                .any(|s| s.camera_id == config.camera_id && s.is_running);
            CameraEntry { config, is_running }
        })
        .collect();
    Json(entries)
}

#[utoipa::path(
    get,
    path = "/cameras/system-info",
    tag = "cameras",
    responses(
        (status = 200, description = "Host and capture information", body = CameraSystemInfo),
        (status = 500, description = "Host scan failed", body = ErrorResponse)
    )
)]
pub async fn system_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CameraSystemInfo>, HttpAppError> {
    let storage_root = state.config.local_storage_path().clone();
    let (system, detected_devices) = tokio::task::spawn_blocking(move || {
        (SystemInfo::collect(&storage_root), detect_video_devices())
    })
    .await
    .map_err(|e| AppError::Internal(format!("System scan task failed: {}", e)))?;

    let ffmpeg_available = state.processing.extractor.ffmpeg_available().await;

    Ok(Json(CameraSystemInfo {
        system,
        detected_devices,
        ffmpeg_available,
        configured_cameras: state.monitors.cameras().len(),
        active_monitors: state.monitors.active_count().await,
    }))
}
