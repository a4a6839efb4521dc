//! Storage setup and initialization

use std::sync::Arc;

use anyhow::{Context, Result};
use vagon_core::Config;
use vagon_storage::{LocalStorage, Storage};

/// Local filesystem storage rooted at `LOCAL_STORAGE_PATH`.
///
/// Video extraction hands object paths straight to ffmpeg, so the backend has
/// to keep objects on a local disk.
pub async fn setup_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    tracing::info!("Initializing storage...");
    let storage = LocalStorage::new(
        config.local_storage_path().clone(),
        config.media_base_url().to_string(),
    )
    .await
    .with_context(|| {
        format!(
            "Failed to initialize storage at {}",
            config.local_storage_path().display()
        )
    })?;

    tracing::info!(
        path = %config.local_storage_path().display(),
        base_url = %config.media_base_url(),
        "Storage initialized successfully"
    );
    Ok(Arc::new(storage))
}
