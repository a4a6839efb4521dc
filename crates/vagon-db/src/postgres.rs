use chrono::{DateTime, Days, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;
use vagon_core::models::{
    Evento, HistorialQuery, NewVagonetaRecord, SearchQuery, VagonetaRecord,
};
use vagon_core::AppError;

use crate::repository::VagonetaRepository;

const RECORD_COLUMNS: &str = r#"
    id, numero, evento, tunel, modelo_ladrillo, merma, confianza,
    origen_deteccion, timestamp, media_reference
"#;

/// A bound value for a dynamically built WHERE clause.
enum FilterValue {
    Text(String),
    Time(DateTime<Utc>),
    Evento(Evento),
    Float(f64),
}

/// Translate historial filters into `AND ...` conditions with positional
/// parameters starting at `$1`. Values are returned in bind order.
fn historial_conditions(query: &HistorialQuery) -> (String, Vec<FilterValue>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    let mut param_count = 1;

    if let Some(numero) = &query.numero {
        conditions.push(format!("AND numero = ${}", param_count));
        values.push(FilterValue::Text(numero.clone()));
        param_count += 1;
    }

    if let Some(fecha) = query.fecha {
        let start = fecha.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = fecha
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc());
        conditions.push(format!("AND timestamp >= ${}", param_count));
        values.push(FilterValue::Time(start));
        param_count += 1;
        if let Some(end) = end {
            conditions.push(format!("AND timestamp < ${}", param_count));
            values.push(FilterValue::Time(end));
            param_count += 1;
        }
    }

    if let Some(desde) = query.fecha_desde {
        conditions.push(format!("AND timestamp >= ${}", param_count));
        values.push(FilterValue::Time(desde));
        param_count += 1;
    }

    if let Some(hasta) = query.fecha_hasta {
        conditions.push(format!("AND timestamp <= ${}", param_count));
        values.push(FilterValue::Time(hasta));
        param_count += 1;
    }

    if let Some(tunel) = &query.tunel {
        conditions.push(format!("AND tunel = ${}", param_count));
        values.push(FilterValue::Text(tunel.clone()));
        param_count += 1;
    }

    if let Some(modelo) = &query.modelo {
        conditions.push(format!("AND modelo_ladrillo = ${}", param_count));
        values.push(FilterValue::Text(modelo.clone()));
        param_count += 1;
    }

    if let Some(evento) = query.evento {
        conditions.push(format!("AND evento = ${}", param_count));
        values.push(FilterValue::Evento(evento));
        param_count += 1;
    }

    if let Some(min) = query.merma_min {
        conditions.push(format!("AND merma >= ${}", param_count));
        values.push(FilterValue::Float(min));
        param_count += 1;
    }

    if let Some(max) = query.merma_max {
        conditions.push(format!("AND merma <= ${}", param_count));
        values.push(FilterValue::Float(max));
    }

    (conditions.join(" "), values)
}

/// Escape LIKE wildcards so user text matches literally.
fn like_pattern(q: &str) -> String {
    let escaped = q
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Clone)]
pub struct PostgresVagonetaRepository {
    pool: PgPool,
}

impl PostgresVagonetaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl VagonetaRepository for PostgresVagonetaRepository {
    #[tracing::instrument(skip(self, record), fields(
        db.system = "postgresql",
        db.table = "vagonetas",
        db.operation = "insert",
        numero = %record.numero
    ))]
    async fn insert(&self, record: NewVagonetaRecord) -> Result<VagonetaRecord, AppError> {
        let sql = format!(
            r#"
            INSERT INTO vagonetas (
                id, numero, evento, tunel, modelo_ladrillo, merma, confianza,
                origen_deteccion, timestamp, media_reference
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );

        sqlx::query_as::<Postgres, VagonetaRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(&record.numero)
            .bind(record.evento)
            .bind(&record.tunel)
            .bind(&record.modelo_ladrillo)
            .bind(record.merma)
            .bind(record.confianza)
            .bind(record.origen_deteccion)
            .bind(Utc::now())
            .bind(&record.media_reference)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, numero = %record.numero, "Failed to insert vagoneta record");
                AppError::from(e)
            })
    }

    #[tracing::instrument(skip(self), fields(db.table = "vagonetas", db.operation = "select"))]
    async fn list(&self, query: &HistorialQuery) -> Result<Vec<VagonetaRecord>, AppError> {
        let (conditions, values) = historial_conditions(query);
        let next_param = values.len() + 1;

        let sql = format!(
            "SELECT {} FROM vagonetas WHERE 1=1 {} ORDER BY timestamp DESC, id LIMIT ${} OFFSET ${}",
            RECORD_COLUMNS,
            conditions,
            next_param,
            next_param + 1
        );

        let mut query_builder = sqlx::query_as::<Postgres, VagonetaRecord>(&sql);
        for value in values {
            query_builder = match value {
                FilterValue::Text(v) => query_builder.bind(v),
                FilterValue::Time(v) => query_builder.bind(v),
                FilterValue::Evento(v) => query_builder.bind(v),
                FilterValue::Float(v) => query_builder.bind(v),
            };
        }

        query_builder
            .bind(query.limit)
            .bind(query.skip)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::from)
    }

    #[tracing::instrument(skip(self), fields(db.table = "vagonetas", db.operation = "count"))]
    async fn count(&self, query: &HistorialQuery) -> Result<i64, AppError> {
        let (conditions, values) = historial_conditions(query);
        let sql = format!("SELECT COUNT(*) FROM vagonetas WHERE 1=1 {}", conditions);

        let mut query_builder = sqlx::query_scalar::<Postgres, i64>(&sql);
        for value in values {
            query_builder = match value {
                FilterValue::Text(v) => query_builder.bind(v),
                FilterValue::Time(v) => query_builder.bind(v),
                FilterValue::Evento(v) => query_builder.bind(v),
                FilterValue::Float(v) => query_builder.bind(v),
            };
        }

        query_builder
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from)
    }

    #[tracing::instrument(skip(self), fields(db.table = "vagonetas", db.operation = "select"))]
    async fn trajectory(&self, numero: &str) -> Result<Vec<VagonetaRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM vagonetas WHERE numero = $1 ORDER BY timestamp ASC, id ASC",
            RECORD_COLUMNS
        );

        sqlx::query_as::<Postgres, VagonetaRecord>(&sql)
            .bind(numero)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::from)
    }

    #[tracing::instrument(skip(self), fields(db.table = "vagonetas", db.operation = "search"))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<VagonetaRecord>, AppError> {
        let sql = format!(
            r#"
            SELECT {} FROM vagonetas
            WHERE numero ILIKE $1 OR tunel ILIKE $1 OR modelo_ladrillo ILIKE $1
            ORDER BY timestamp DESC, id
            LIMIT $2 OFFSET $3
            "#,
            RECORD_COLUMNS
        );

        sqlx::query_as::<Postgres, VagonetaRecord>(&sql)
            .bind(like_pattern(&query.q))
            .bind(query.limit)
            .bind(query.skip)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(AppError::from)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
