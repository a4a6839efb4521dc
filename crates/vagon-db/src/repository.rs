use vagon_core::models::{HistorialQuery, NewVagonetaRecord, SearchQuery, VagonetaRecord};
use vagon_core::AppError;

/// Access to the vagoneta record store.
///
/// Implementations assign `id` and a UTC `timestamp` on insert. There is
/// intentionally no update or delete.
#[async_trait::async_trait]
pub trait VagonetaRepository: Send + Sync {
    async fn insert(&self, record: NewVagonetaRecord) -> Result<VagonetaRecord, AppError>;

    /// Filtered page of records, newest first
    async fn list(&self, query: &HistorialQuery) -> Result<Vec<VagonetaRecord>, AppError>;

    /// Number of records matching the filters, ignoring paging
    async fn count(&self, query: &HistorialQuery) -> Result<i64, AppError>;

    /// Every record for one number, oldest first
    async fn trajectory(&self, numero: &str) -> Result<Vec<VagonetaRecord>, AppError>;

    /// Case-insensitive substring match on numero, tunel and modelo_ladrillo
    async fn search(&self, query: &SearchQuery) -> Result<Vec<VagonetaRecord>, AppError>;

    /// Cheap connectivity check used by the readiness check
    async fn ping(&self) -> Result<(), AppError>;

    fn backend_name(&self) -> &'static str;
}
