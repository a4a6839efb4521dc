use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::AppError;

/// Reason attached to every ignored outcome.
pub const IGNORED_REASON: &str = "sin vagoneta o número";

/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Width over height; zero for degenerate boxes.
    pub fn aspect_ratio(&self) -> f32 {
        let h = self.height();
        if h <= f32::EPSILON {
            0.0
        } else {
            self.width() / h
        }
    }

    /// Rectangle gap: 0 when boxes touch or overlap, otherwise the larger of
    /// the horizontal and vertical separations.
    pub fn gap_to(&self, other: &BoundingBox) -> f32 {
        let dx = (other.x1 - self.x2).max(self.x1 - other.x2).max(0.0);
        let dy = (other.y1 - self.y2).max(self.y1 - other.y2).max(0.0);
        dx.max(dy)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= f32::EPSILON {
            0.0
        } else {
            inter / union
        }
    }

    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }
}

/// A raw candidate produced by the detector for one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct DetectionEvent {
    pub frame_index: u64,
    /// Recognized label; may be a fragment of a longer number
    pub raw_number: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// Ensemble strategy applied by the detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    #[serde(alias = "estandar", alias = "estándar")]
    Standard,
    #[serde(alias = "mejorado")]
    Enhanced,
    #[serde(alias = "agresivo")]
    Aggressive,
}

impl DetectionMode {
    pub const ALL: [DetectionMode; 3] = [
        DetectionMode::Standard,
        DetectionMode::Enhanced,
        DetectionMode::Aggressive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Standard => "standard",
            DetectionMode::Enhanced => "enhanced",
            DetectionMode::Aggressive => "aggressive",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DetectionMode::Standard => "Single pass over the original frame",
            DetectionMode::Enhanced => "Adds a histogram-equalized pass",
            DetectionMode::Aggressive => "Adds equalized, sharpened and upscaled passes",
        }
    }
}

impl Display for DetectionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "estandar" | "estándar" => Ok(DetectionMode::Standard),
            "enhanced" | "mejorado" => Ok(DetectionMode::Enhanced),
            "aggressive" | "agresivo" => Ok(DetectionMode::Aggressive),
            other => Err(format!("unknown detection mode '{}'", other)),
        }
    }
}

/// Detector tunables. Jobs take a snapshot when they start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct DetectorSettings {
    pub min_confidence: f32,
    /// Max pixel gap between fragments that belong to one number
    pub umbral_agrupacion: f32,
    pub usar_agrupacion: bool,
    pub modo_deteccion: DetectionMode,
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(0.1..=1.0).contains(&self.min_confidence) {
            return Err(AppError::InvalidInput(format!(
                "min_confidence must be between 0.1 and 1.0, got {}",
                self.min_confidence
            )));
        }
        if !(1.0..=1000.0).contains(&self.umbral_agrupacion) {
            return Err(AppError::InvalidInput(format!(
                "umbral_agrupacion must be between 1 and 1000, got {}",
                self.umbral_agrupacion
            )));
        }
        Ok(())
    }

    /// Apply a partial update, returning the validated result without
    /// touching `self` when validation fails.
    pub fn merged(&self, update: &DetectorSettingsUpdate) -> Result<DetectorSettings, AppError> {
        let next = DetectorSettings {
            min_confidence: update.min_confidence.unwrap_or(self.min_confidence),
            umbral_agrupacion: update.umbral_agrupacion.unwrap_or(self.umbral_agrupacion),
            usar_agrupacion: update.usar_agrupacion.unwrap_or(self.usar_agrupacion),
            modo_deteccion: update.modo_deteccion.unwrap_or(self.modo_deteccion),
        };
        next.validate()?;
        Ok(next)
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            umbral_agrupacion: 50.0,
            usar_agrupacion: true,
            modo_deteccion: DetectionMode::Enhanced,
        }
    }
}

/// Partial update body for `/model/config`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct DetectorSettingsUpdate {
    pub min_confidence: Option<f32>,
    pub umbral_agrupacion: Option<f32>,
    pub usar_agrupacion: Option<bool>,
    pub modo_deteccion: Option<DetectionMode>,
}

/// Result of aggregating the detections of one frame (or a whole video).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Accepted { numero: String, confianza: f32 },
    Ignored { reason: String },
    Error { reason: String },
}

impl Outcome {
    pub fn ignored() -> Self {
        Outcome::Ignored {
            reason: IGNORED_REASON.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }

    /// Human-readable message for clients
    pub fn message(&self) -> String {
        match self {
            Outcome::Accepted { numero, confianza } => {
                format!("Vagoneta {} detectada (confianza {:.2})", numero, confianza)
            }
            Outcome::Ignored { reason } => reason.clone(),
            Outcome::Error { reason } => reason.clone(),
        }
    }
}
