//! Configuration validation
//!
//! Checks run at startup so misconfiguration fails fast instead of surfacing
//! on the first upload.

use anyhow::Result;
use vagon_core::{Config, StoreBackend};

pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;

    if config.is_production() {
        if config.cors_origins().contains(&"*".to_string()) {
            return Err(anyhow::anyhow!(
                "CORS configured to allow all origins (*) in production. \
                Please set specific allowed origins via CORS_ORIGINS."
            ));
        }
        if config.store_backend() == StoreBackend::Memory {
            tracing::warn!("STORE_BACKEND=memory in production; records will not survive a restart");
        }
    }

    if config.detector_url().is_none() {
        tracing::warn!("DETECTOR_URL is not set; uploads will end with a detection error");
    }

    if let Some(path) = config.cameras_config_path() {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "CAMERAS_CONFIG_PATH {} does not exist",
                path.display()
            ));
        }
    }

    Ok(())
}
