//! Detector introspection and tuning.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;
use vagon_core::models::{DetectionMode, DetectorSettings, DetectorSettingsUpdate};

use crate::detection::DetectionContext;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};

#[derive(Debug, Serialize, ToSchema)]
pub struct ModeInfo {
    pub mode: DetectionMode,
    pub description: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModelInfo {
    pub model_type: String,
    /// `http`, or `unconfigured` when no detector URL is set
    pub backend: String,
    pub classes_count: usize,
    pub classes: Vec<String>,
    pub vocabulary_strict: bool,
    pub confidence_threshold: f32,
    pub umbral_agrupacion: f32,
    pub usar_agrupacion: bool,
    pub modo_deteccion: DetectionMode,
    pub modes: Vec<ModeInfo>,
}

#[utoipa::path(
    get,
    path = "/model/info",
    tag = "model",
    responses((status = 200, description = "Recognizer and current settings", body = ModelInfo))
)]
pub async fn model_info(State(detection): State<DetectionContext>) -> Json<ModelInfo> {
    let recognizer = detection.detector().recognizer();
    let vocabulary = detection.aggregator().vocabulary();
    let settings = detection.settings();

    Json(ModelInfo {
        model_type: recognizer.model_type(),
        backend: recognizer.backend_name().to_string(),
        classes_count: vocabulary.classes().len(),
        classes: vocabulary.classes().to_vec(),
        vocabulary_strict: vocabulary.is_strict(),
        confidence_threshold: settings.min_confidence,
        umbral_agrupacion: settings.umbral_agrupacion,
        usar_agrupacion: settings.usar_agrupacion,
        modo_deteccion: settings.modo_deteccion,
        modes: DetectionMode::ALL
            .iter()
            .map(|mode| ModeInfo {
                mode: *mode,
                description: mode.description().to_string(),
            })
            .collect(),
    })
}

#[utoipa::path(
    get,
    path = "/model/config",
    tag = "model",
    responses((status = 200, description = "Current detector settings", body = DetectorSettings))
)]
pub async fn get_model_config(State(detection): State<DetectionContext>) -> Json<DetectorSettings> {
    Json(detection.settings())
}

/// Partially update detector settings
///
/// Only the given fields change. Jobs already running keep the settings they
/// started with.
#[utoipa::path(
    post,
    path = "/model/config",
    tag = "model",
    request_body = DetectorSettingsUpdate,
    responses(
        (status = 200, description = "Updated settings", body = DetectorSettings),
        (status = 400, description = "Value out of range", body = ErrorResponse)
    )
)]
pub async fn update_model_config(
    State(detection): State<DetectionContext>,
    ValidatedJson(update): ValidatedJson<DetectorSettingsUpdate>,
) -> Result<Json<DetectorSettings>, HttpAppError> {
    Ok(Json(detection.update(&update)?))
}
