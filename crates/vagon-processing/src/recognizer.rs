//! Number recognition backends.
//!
//! The recognition model itself runs out of process. [`HttpRecognizer`]
//! sends a JPEG to a prediction endpoint and reads back labelled boxes.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vagon_core::models::BoundingBox;
use vagon_core::AppError;

use crate::frames::encode_jpeg;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detector is not configured")]
    Unconfigured,

    #[error("Detector request failed: {0}")]
    Request(String),

    #[error("Detector returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Detector returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

impl From<DetectionError> for AppError {
    fn from(err: DetectionError) -> Self {
        AppError::Detection(err.to_string())
    }
}

/// One labelled box as returned by a recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[async_trait]
pub trait NumberRecognizer: Send + Sync {
    /// Recognize number fragments in a frame. Pixel coordinates refer to
    /// the image passed in.
    async fn recognize(
        &self,
        image: &RgbImage,
        min_confidence: f32,
    ) -> Result<Vec<RawDetection>, DetectionError>;

    fn backend_name(&self) -> &'static str;

    /// Model identifier reported by the status endpoint
    fn model_type(&self) -> String;
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    image: String,
    min_confidence: f32,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    detections: Vec<PredictedBox>,
}

#[derive(Debug, Deserialize)]
struct PredictedBox {
    label: String,
    confidence: f32,
    bbox: [f32; 4],
}

const PAYLOAD_JPEG_QUALITY: u8 = 90;

fn encode_payload(image: &RgbImage) -> Result<String, DetectionError> {
    let jpeg = encode_jpeg(image, PAYLOAD_JPEG_QUALITY)
        .map_err(|e| DetectionError::Encode(e.to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

/// Run CPU-bound frame work without stalling the async workers.
async fn on_blocking_pool<T, F>(work: F) -> Result<T, DetectionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DetectionError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DetectionError::Encode(format!("encode task failed: {}", e)))?
}

pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecognizer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl NumberRecognizer for HttpRecognizer {
    #[tracing::instrument(skip(self, image), fields(
        detector.url = %self.base_url,
        width = image.width(),
        height = image.height()
    ))]
    async fn recognize(
        &self,
        image: &RgbImage,
        min_confidence: f32,
    ) -> Result<Vec<RawDetection>, DetectionError> {
        let image = image.clone();
        let request = PredictRequest {
            image: on_blocking_pool(move || encode_payload(&image)).await?,
            min_confidence,
        };

        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| DetectionError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, body = %body, "Detector returned an error status");
            return Err(DetectionError::Status { status, body });
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::InvalidResponse(e.to_string()))?;

        let detections = parsed
            .detections
            .into_iter()
            .filter(|d| d.confidence.is_finite() && d.bbox.iter().all(|v| v.is_finite()))
            .map(|d| RawDetection {
                label: d.label.trim().to_string(),
                confidence: d.confidence.clamp(0.0, 1.0),
                bbox: BoundingBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
            })
            .collect::<Vec<_>>();

        tracing::debug!(count = detections.len(), "Detector response parsed");
        Ok(detections)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }

    fn model_type(&self) -> String {
        format!("remote ({})", self.base_url)
    }
}

/// Stand-in used when no detector URL is configured. Every call fails, so
/// uploads still flow through the pipeline and end in an error outcome.
#[derive(Debug, Default)]
pub struct UnconfiguredRecognizer;

#[async_trait]
impl NumberRecognizer for UnconfiguredRecognizer {
    async fn recognize(
        &self,
        _image: &RgbImage,
        _min_confidence: f32,
    ) -> Result<Vec<RawDetection>, DetectionError> {
        Err(DetectionError::Unconfigured)
    }

    fn backend_name(&self) -> &'static str {
        "unconfigured"
    }

    fn model_type(&self) -> String {
        "unconfigured".to_string()
    }
}
