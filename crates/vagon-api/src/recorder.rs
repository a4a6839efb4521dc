use std::sync::Arc;

use vagon_core::models::{EventMetadata, NewVagonetaRecord, OrigenDeteccion, VagonetaRecord};
use vagon_core::AppError;
use vagon_db::VagonetaRepository;

use crate::broadcast::{BroadcastKind, DetectionBroadcaster};

/// An accepted detection ready to be persisted.
#[derive(Debug, Clone)]
pub struct AcceptedDetection {
    pub numero: String,
    pub confianza: f32,
    pub origen: OrigenDeteccion,
    /// Storage key of the frame or upload the number was read from
    pub media_reference: String,
}

/// Confidence is stored with four decimals so the f32 aggregate does not
/// leak float noise into the record.
fn stored_confidence(confianza: f32) -> f64 {
    ((confianza as f64) * 10_000.0).round() / 10_000.0
}

/// Writes one durable record per accepted detection and announces it.
///
/// Only accepted detections reach this type, so ignored or failed outcomes
/// can never produce a record.
#[derive(Clone)]
pub struct EventRecorder {
    repository: Arc<dyn VagonetaRepository>,
    broadcaster: DetectionBroadcaster,
}

impl EventRecorder {
    pub fn new(repository: Arc<dyn VagonetaRepository>, broadcaster: DetectionBroadcaster) -> Self {
        Self {
            repository,
            broadcaster,
        }
    }

    pub fn repository(&self) -> &Arc<dyn VagonetaRepository> {
        &self.repository
    }

    #[tracing::instrument(skip(self, detection, metadata), fields(
        numero = %detection.numero,
        evento = %metadata.evento,
        origen = ?detection.origen
    ))]
    pub async fn record(
        &self,
        detection: AcceptedDetection,
        metadata: &EventMetadata,
    ) -> Result<VagonetaRecord, AppError> {
        let kind = match detection.origen {
            OrigenDeteccion::Manual => BroadcastKind::NewDetection,
            OrigenDeteccion::Auto => BroadcastKind::MonitorDetection,
        };

        let record = self
            .repository
            .insert(NewVagonetaRecord {
                numero: detection.numero,
                evento: metadata.evento,
                tunel: metadata.tunel.clone(),
                modelo_ladrillo: metadata.modelo_ladrillo.clone(),
                merma: metadata.merma,
                confianza: stored_confidence(detection.confianza),
                origen_deteccion: detection.origen,
                media_reference: detection.media_reference,
            })
            .await?;

        tracing::info!(
            record_id = %record.id,
            numero = %record.numero,
            confianza = record.confianza,
            "Vagoneta record created"
        );

        self.broadcaster.publish(kind, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vagon_core::models::Evento;
    use vagon_db::InMemoryVagonetaRepository;

    fn metadata() -> EventMetadata {
        EventMetadata {
            evento: Evento::Egreso,
            tunel: Some("Túnel 1".to_string()),
            modelo_ladrillo: None,
            merma: Some(4.0),
        }
    }

    #[tokio::test]
    async fn record_persists_and_broadcasts() {
        let repo = Arc::new(InMemoryVagonetaRepository::new());
        let broadcaster = DetectionBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        let recorder = EventRecorder::new(repo.clone(), broadcaster);

        let record = recorder
            .record(
                AcceptedDetection {
                    numero: "012".to_string(),
                    confianza: 0.6,
                    origen: OrigenDeteccion::Manual,
                    media_reference: "uploads/x_cart.jpg".to_string(),
                },
                &metadata(),
            )
            .await
            .unwrap();

        assert_eq!(record.confianza, 0.6);
        assert_eq!(record.evento, Evento::Egreso);
        assert_eq!(repo.len().await, 1);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.kind, BroadcastKind::NewDetection);
        assert_eq!(msg.data.id, record.id);
    }

    #[test]
    fn confidence_is_rounded() {
        assert_eq!(stored_confidence(0.6), 0.6);
        assert_eq!(stored_confidence(0.123456), 0.1235);
    }
}
