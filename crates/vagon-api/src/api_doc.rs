//! OpenAPI documentation, served at `/api/openapi.json` and browsable at `/docs`.

use utoipa::OpenApi;

use crate::broadcast::{BroadcastKind, BroadcastMessage};
use crate::error::ErrorResponse;
use crate::handlers;
use crate::handlers::image_upload::{BatchUploadItem, BatchUploadResponse};
use crate::monitor::{CameraStats, CameraStatus, MonitorAction, MonitorResponse};
use crate::pipeline::{ImageAnalysis, ImageStatus};
use crate::progress::{BestComposite, JobEvent, JobEventKind, JobSnapshot};
use vagon_core::models;
use vagon_storage::{PutStatus, UploadStatus};

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Vagon API",
        version = "0.1.0",
        description = "Vagoneta number detection for brick kiln tunnels. Chunked image and video uploads, live camera monitoring, detection history and trajectories."
    ),
    paths(
        // Uploads
        handlers::image_upload::upload_image,
        handlers::image_upload::upload_multiple,
        handlers::uploads::upload_chunk,
        handlers::uploads::finalize_upload,
        handlers::uploads::upload_status,
        handlers::uploads::abort_upload,
        handlers::media::get_media,
        // Processing
        handlers::processing::processing_status,
        handlers::processing::cancel_processing,
        handlers::processing::stream_processing,
        // Records
        handlers::records::list_records,
        handlers::records::search_records,
        handlers::records::trajectory,
        handlers::records::trajectory_stats,
        handlers::live::detections_ws,
        // Monitoring
        handlers::monitor::start_monitor,
        handlers::monitor::stop_monitor,
        handlers::monitor::monitor_statuses,
        handlers::monitor::monitor_status,
        handlers::cameras::list_cameras,
        handlers::cameras::system_info,
        // Model
        handlers::model::model_info,
        handlers::model::get_model_config,
        handlers::model::update_model_config,
    ),
    components(
        schemas(
            ErrorResponse,
            models::VagonetaRecord,
            models::Evento,
            models::OrigenDeteccion,
            models::EventMetadata,
            models::TrajectoryStats,
            models::DetectorSettings,
            models::DetectorSettingsUpdate,
            models::DetectionMode,
            models::JobStatus,
            models::Outcome,
            models::CameraConfig,
            PutStatus,
            UploadStatus,
            ImageStatus,
            ImageAnalysis,
            BatchUploadItem,
            BatchUploadResponse,
            JobEventKind,
            JobEvent,
            JobSnapshot,
            BestComposite,
            BroadcastKind,
            BroadcastMessage,
            CameraStats,
            CameraStatus,
            MonitorAction,
            MonitorResponse,
        )
    ),
    tags(
        (name = "uploads", description = "Direct and chunked uploads, stored media"),
        (name = "processing", description = "Video job status, cancellation and progress stream"),
        (name = "records", description = "Detection history, search and trajectories"),
        (name = "monitor", description = "Continuous camera monitoring"),
        (name = "cameras", description = "Configured cameras and host capture devices"),
        (name = "model", description = "Detector information and tuning"),
    )
)]
pub struct ApiDoc;
