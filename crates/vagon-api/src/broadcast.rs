//! System-wide fan-out of new detections to WebSocket clients.
//!
//! Delivery is best effort: a client that falls behind skips the missed
//! messages, and nothing is replayed on reconnect.

use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;
use vagon_core::models::VagonetaRecord;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastKind {
    /// Record created from an upload
    NewDetection,
    /// Record created by a camera monitor
    MonitorDetection,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: BroadcastKind,
    pub data: VagonetaRecord,
}

#[derive(Clone)]
pub struct DetectionBroadcaster {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl Default for DetectionBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }

    /// Returns the number of connected clients that will see the message.
    pub fn publish(&self, kind: BroadcastKind, record: VagonetaRecord) -> usize {
        let numero = record.numero.clone();
        match self.sender.send(BroadcastMessage { kind, data: record }) {
            Ok(receivers) => {
                tracing::debug!(numero = %numero, receivers, "Detection broadcast");
                receivers
            }
            // No subscribers
            Err(_) => 0,
        }
    }

    pub fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vagon_core::models::{Evento, OrigenDeteccion};

    fn record() -> VagonetaRecord {
        VagonetaRecord {
            id: Uuid::new_v4(),
            numero: "012".to_string(),
            evento: Evento::Ingreso,
            tunel: None,
            modelo_ladrillo: None,
            merma: None,
            confianza: 0.6,
            origen_deteccion: OrigenDeteccion::Auto,
            timestamp: Utc::now(),
            media_reference: "frames/a.jpg".to_string(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_message() {
        let broadcaster = DetectionBroadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(BroadcastKind::MonitorDetection, record()), 2);

        assert_eq!(a.recv().await.unwrap().kind, BroadcastKind::MonitorDetection);
        assert_eq!(b.recv().await.unwrap().data.numero, "012");
    }

    #[test]
    fn publishing_without_clients_is_fine() {
        let broadcaster = DetectionBroadcaster::new();
        assert_eq!(broadcaster.publish(BroadcastKind::NewDetection, record()), 0);
    }

    #[test]
    fn message_wire_shape() {
        let msg = BroadcastMessage {
            kind: BroadcastKind::NewDetection,
            data: record(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "new_detection");
        assert_eq!(json["data"]["numero"], "012");
    }
}
