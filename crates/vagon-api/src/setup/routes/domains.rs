//! Domain route groups (uploads, processing, records, monitoring, model).

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

pub fn upload_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload/", post(handlers::image_upload::upload_image))
        .route(
            "/upload-multiple/",
            post(handlers::image_upload::upload_multiple),
        )
        .route("/upload-chunk/", post(handlers::uploads::upload_chunk))
        .route("/finalize-upload/", post(handlers::uploads::finalize_upload))
        .route(
            "/upload-status/{file_id}",
            get(handlers::uploads::upload_status),
        )
        .route(
            "/abort-upload/{file_id}",
            post(handlers::uploads::abort_upload),
        )
        .route("/media/{*key}", get(handlers::media::get_media))
        .with_state(state)
}

pub fn processing_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/processing-status/{processing_id}",
            get(handlers::processing::processing_status),
        )
        .route(
            "/cancel-processing/{processing_id}",
            post(handlers::processing::cancel_processing),
        )
        .route(
            "/stream-video-processing/{processing_id}",
            get(handlers::processing::stream_processing),
        )
        .with_state(state)
}

pub fn record_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/vagonetas/", get(handlers::records::list_records))
        .route("/historial/", get(handlers::records::list_records))
        .route("/search", get(handlers::records::search_records))
        .route("/trayectoria/{numero}", get(handlers::records::trajectory))
        .route(
            "/trayectoria/{numero}/estadisticas",
            get(handlers::records::trajectory_stats),
        )
        .route("/ws/detections", get(handlers::live::detections_ws))
        .with_state(state)
}

pub fn monitor_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/monitor/start/{camera_id}",
            post(handlers::monitor::start_monitor),
        )
        .route(
            "/monitor/stop/{camera_id}",
            post(handlers::monitor::stop_monitor),
        )
        .route("/monitor/status", get(handlers::monitor::monitor_statuses))
        .route(
            "/monitor/status/{camera_id}",
            get(handlers::monitor::monitor_status),
        )
        .route("/cameras/list", get(handlers::cameras::list_cameras))
        .route("/cameras/system-info", get(handlers::cameras::system_info))
        .with_state(state)
}

pub fn model_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/model/info", get(handlers::model::model_info))
        .route(
            "/model/config",
            get(handlers::model::get_model_config)
                .post(handlers::model::update_model_config)
                .put(handlers::model::update_model_config),
        )
        .with_state(state)
}
