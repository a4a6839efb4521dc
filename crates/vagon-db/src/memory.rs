use chrono::{Days, NaiveTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;
use vagon_core::models::{HistorialQuery, NewVagonetaRecord, SearchQuery, VagonetaRecord};
use vagon_core::AppError;

use crate::repository::VagonetaRepository;

/// Process-local record store, for development and tests.
#[derive(Default)]
pub struct InMemoryVagonetaRepository {
    records: RwLock<Vec<VagonetaRecord>>,
}

impl InMemoryVagonetaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn matches(record: &VagonetaRecord, query: &HistorialQuery) -> bool {
    if let Some(numero) = &query.numero {
        if &record.numero != numero {
            return false;
        }
    }
    if let Some(fecha) = query.fecha {
        let start = fecha.and_time(NaiveTime::MIN).and_utc();
        if record.timestamp < start {
            return false;
        }
        if let Some(next) = fecha.checked_add_days(Days::new(1)) {
            if record.timestamp >= next.and_time(NaiveTime::MIN).and_utc() {
                return false;
            }
        }
    }
    if query.fecha_desde.is_some_and(|desde| record.timestamp < desde) {
        return false;
    }
    if query.fecha_hasta.is_some_and(|hasta| record.timestamp > hasta) {
        return false;
    }
    if query.tunel.is_some() && record.tunel != query.tunel {
        return false;
    }
    if query.modelo.is_some() && record.modelo_ladrillo != query.modelo {
        return false;
    }
    if query.evento.is_some_and(|e| record.evento != e) {
        return false;
    }
    // Records without merma never satisfy a merma bound, as in SQL
    if let Some(min) = query.merma_min {
        if !record.merma.is_some_and(|m| m >= min) {
            return false;
        }
    }
    if let Some(max) = query.merma_max {
        if !record.merma.is_some_and(|m| m <= max) {
            return false;
        }
    }
    true
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

/// Newest first; among equal timestamps the later insert comes first.
fn newest_first(mut records: Vec<VagonetaRecord>) -> Vec<VagonetaRecord> {
    records.reverse();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records
}

fn page(records: Vec<VagonetaRecord>, skip: i64, limit: i64) -> Vec<VagonetaRecord> {
    records
        .into_iter()
        .skip(skip.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait::async_trait]
impl VagonetaRepository for InMemoryVagonetaRepository {
    async fn insert(&self, record: NewVagonetaRecord) -> Result<VagonetaRecord, AppError> {
        let stored = VagonetaRecord {
            id: Uuid::new_v4(),
            numero: record.numero,
            evento: record.evento,
            tunel: record.tunel,
            modelo_ladrillo: record.modelo_ladrillo,
            merma: record.merma,
            confianza: record.confianza,
            origen_deteccion: record.origen_deteccion,
            timestamp: Utc::now(),
            media_reference: record.media_reference,
        };
        self.records.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, query: &HistorialQuery) -> Result<Vec<VagonetaRecord>, AppError> {
        let filtered: Vec<VagonetaRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| matches(r, query))
            .cloned()
            .collect();
        Ok(page(newest_first(filtered), query.skip, query.limit))
    }

    async fn count(&self, query: &HistorialQuery) -> Result<i64, AppError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| matches(r, query)).count() as i64)
    }

    async fn trajectory(&self, numero: &str) -> Result<Vec<VagonetaRecord>, AppError> {
        let mut records: Vec<VagonetaRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.numero == numero)
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(records)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<VagonetaRecord>, AppError> {
        let needle = query.q.to_lowercase();
        let filtered: Vec<VagonetaRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| {
                contains_ci(Some(&r.numero), &needle)
                    || contains_ci(r.tunel.as_deref(), &needle)
                    || contains_ci(r.modelo_ladrillo.as_deref(), &needle)
            })
            .cloned()
            .collect();
        Ok(page(newest_first(filtered), query.skip, query.limit))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
