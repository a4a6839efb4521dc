use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Entry or exit of a vagoneta at a capture point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "evento_tipo", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum Evento {
    Ingreso,
    Egreso,
}

impl Display for Evento {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Evento::Ingreso => write!(f, "ingreso"),
            Evento::Egreso => write!(f, "egreso"),
        }
    }
}

/// Whether a record came from a user upload or from a monitored camera.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "origen_deteccion", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum OrigenDeteccion {
    Manual,
    Auto,
}

/// The durable unit of truth: one accepted detection.
///
/// Records are append-only. `timestamp` is assigned by the recorder at write
/// time and is always UTC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct VagonetaRecord {
    pub id: Uuid,
    pub numero: String,
    pub evento: Evento,
    pub tunel: Option<String>,
    pub modelo_ladrillo: Option<String>,
    /// Spoilage percentage (0-100), unrelated to confidence
    pub merma: Option<f64>,
    /// Aggregated confidence of the accepted composite
    pub confianza: f64,
    pub origen_deteccion: OrigenDeteccion,
    pub timestamp: DateTime<Utc>,
    /// Storage key of the frame or file that produced the detection
    pub media_reference: String,
}

/// Values needed to write a new record; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewVagonetaRecord {
    pub numero: String,
    pub evento: Evento,
    pub tunel: Option<String>,
    pub modelo_ladrillo: Option<String>,
    pub merma: Option<f64>,
    pub confianza: f64,
    pub origen_deteccion: OrigenDeteccion,
    pub media_reference: String,
}

/// Event metadata sent along with an upload or taken from a camera config.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct EventMetadata {
    pub evento: Evento,
    #[validate(length(max = 120, message = "tunel must be at most 120 characters"))]
    pub tunel: Option<String>,
    #[validate(length(
        max = 120,
        message = "modelo_ladrillo must be at most 120 characters"
    ))]
    pub modelo_ladrillo: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "merma must be between 0 and 100"))]
    pub merma: Option<f64>,
}

/// Historial filters; also used by `/vagonetas/`.
#[derive(Debug, Clone, Deserialize, Validate, IntoParams)]
pub struct HistorialQuery {
    pub numero: Option<String>,
    /// UTC day in YYYY-MM-DD
    pub fecha: Option<NaiveDate>,
    pub fecha_desde: Option<DateTime<Utc>>,
    pub fecha_hasta: Option<DateTime<Utc>>,
    pub tunel: Option<String>,
    pub modelo: Option<String>,
    pub evento: Option<Evento>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub merma_min: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub merma_max: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub skip: i64,
    #[serde(default = "default_historial_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: i64,
}

fn default_historial_limit() -> i64 {
    50
}

impl Default for HistorialQuery {
    fn default() -> Self {
        Self {
            numero: None,
            fecha: None,
            fecha_desde: None,
            fecha_hasta: None,
            tunel: None,
            modelo: None,
            evento: None,
            merma_min: None,
            merma_max: None,
            skip: 0,
            limit: default_historial_limit(),
        }
    }
}

/// Free-text search over records.
#[derive(Debug, Clone, Deserialize, Validate, IntoParams)]
pub struct SearchQuery {
    #[validate(length(min = 2, message = "q must be at least 2 characters"))]
    pub q: String,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub skip: i64,
    #[serde(default = "default_search_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: i64,
}

fn default_search_limit() -> i64 {
    20
}

/// Summary of a vagoneta's movement history.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrajectoryStats {
    pub numero: String,
    pub total_eventos: usize,
    pub ingresos: usize,
    pub egresos: usize,
    pub primer_registro: DateTime<Utc>,
    pub ultimo_registro: DateTime<Utc>,
    pub merma_promedio: Option<f64>,
    pub tuneles: Vec<String>,
}

impl TrajectoryStats {
    /// Build statistics from a trajectory sorted ascending by timestamp.
    /// Returns `None` for an empty trajectory.
    pub fn from_trajectory(numero: &str, records: &[VagonetaRecord]) -> Option<Self> {
        let first = records.first()?;
        let last = records.last()?;

        let ingresos = records
            .iter()
            .filter(|r| r.evento == Evento::Ingreso)
            .count();
        let mermas: Vec<f64> = records.iter().filter_map(|r| r.merma).collect();
        let merma_promedio = if mermas.is_empty() {
            None
        } else {
            Some(mermas.iter().sum::<f64>() / mermas.len() as f64)
        };

        let mut tuneles: Vec<String> = Vec::new();
        for tunel in records.iter().filter_map(|r| r.tunel.as_ref()) {
            if !tuneles.contains(tunel) {
                tuneles.push(tunel.clone());
            }
        }

        Some(Self {
            numero: numero.to_string(),
            total_eventos: records.len(),
            ingresos,
            egresos: records.len() - ingresos,
            primer_registro: first.timestamp,
            ultimo_registro: last.timestamp,
            merma_promedio,
            tuneles,
        })
    }
}
