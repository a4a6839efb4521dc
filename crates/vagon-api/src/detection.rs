use std::sync::{Arc, PoisonError, RwLock};

use vagon_core::models::{DetectorSettings, DetectorSettingsUpdate};
use vagon_core::AppError;
use vagon_processing::{DetectionAggregator, Detector};

/// Detector, aggregator and the live tunables shared by uploads, video jobs
/// and camera monitors.
///
/// Callers take a settings snapshot when work starts; an update only affects
/// work started afterwards.
#[derive(Clone)]
pub struct DetectionContext {
    detector: Detector,
    aggregator: DetectionAggregator,
    settings: Arc<RwLock<DetectorSettings>>,
}

impl DetectionContext {
    pub fn new(
        detector: Detector,
        aggregator: DetectionAggregator,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            detector,
            aggregator,
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn aggregator(&self) -> &DetectionAggregator {
        &self.aggregator
    }

    pub fn settings(&self) -> DetectorSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a partial update. Invalid values leave the settings untouched.
    pub fn update(&self, update: &DetectorSettingsUpdate) -> Result<DetectorSettings, AppError> {
        let mut guard = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let next = guard.merged(update)?;
        *guard = next;
        tracing::info!(
            min_confidence = next.min_confidence,
            umbral_agrupacion = next.umbral_agrupacion,
            usar_agrupacion = next.usar_agrupacion,
            modo_deteccion = %next.modo_deteccion,
            "Detector settings updated"
        );
        Ok(next)
    }
}
