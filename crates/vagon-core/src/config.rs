//! Configuration module
//!
//! Environment-driven configuration for the detection service: server, store,
//! upload limits, video sampling, detector tunables and camera sources.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::models::{DetectionMode, DetectorSettings};

// Common constants
const SERVER_PORT: u16 = 8000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const HTTP_CONCURRENCY_LIMIT: usize = 10_000;

/// Where vagoneta records are kept
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow::anyhow!(
                "Unknown STORE_BACKEND '{}', expected 'postgres' or 'memory'",
                other
            )),
        }
    }
}

/// Base configuration shared by every binary
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    pub log_format: String,
    /// Requests served at once across all routes
    pub http_concurrency_limit: usize,
}

/// Detection service configuration
#[derive(Clone, Debug)]
pub struct DetectionServiceConfig {
    pub base: BaseConfig,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    // Storage
    pub local_storage_path: PathBuf,
    pub media_base_url: String,
    // Chunked uploads
    pub max_upload_size_bytes: u64,
    pub max_chunk_size_bytes: usize,
    pub max_total_chunks: u32,
    pub upload_ttl_secs: u64,
    // Video
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub video_sample_fps: f32,
    pub video_max_sampled_frames: usize,
    // Processing jobs
    pub max_concurrent_jobs: usize,
    pub job_queue_size: usize,
    pub job_retention_secs: u64,
    // Detector
    pub detector_url: Option<String>,
    pub detector_timeout_secs: u64,
    pub min_confidence: f32,
    pub umbral_agrupacion: f32,
    pub usar_agrupacion: bool,
    pub modo_deteccion: DetectionMode,
    pub vocabulary_strict: bool,
    // Cameras
    pub cameras_config_path: Option<PathBuf>,
    pub capture_width: u32,
    pub capture_height: u32,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<DetectionServiceConfig>);

impl Config {
    fn inner(&self) -> &DetectionServiceConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_env(&self.inner().base.environment)
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = DetectionServiceConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    // Convenience getters for common fields
    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn http_concurrency_limit(&self) -> usize {
        self.inner().base.http_concurrency_limit
    }

    pub fn json_logs(&self) -> bool {
        self.inner().base.log_format.eq_ignore_ascii_case("json")
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.inner().store_backend
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().database_url.as_deref()
    }

    pub fn local_storage_path(&self) -> &PathBuf {
        &self.inner().local_storage_path
    }

    pub fn media_base_url(&self) -> &str {
        &self.inner().media_base_url
    }

    pub fn max_upload_size_bytes(&self) -> u64 {
        self.inner().max_upload_size_bytes
    }

    pub fn max_chunk_size_bytes(&self) -> usize {
        self.inner().max_chunk_size_bytes
    }

    pub fn max_total_chunks(&self) -> u32 {
        self.inner().max_total_chunks
    }

    pub fn upload_ttl_secs(&self) -> u64 {
        self.inner().upload_ttl_secs
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.inner().ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &str {
        &self.inner().ffprobe_path
    }

    pub fn video_sample_fps(&self) -> f32 {
        self.inner().video_sample_fps
    }

    pub fn video_max_sampled_frames(&self) -> usize {
        self.inner().video_max_sampled_frames
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.inner().max_concurrent_jobs
    }

    pub fn job_queue_size(&self) -> usize {
        self.inner().job_queue_size
    }

    pub fn job_retention_secs(&self) -> u64 {
        self.inner().job_retention_secs
    }

    pub fn detector_url(&self) -> Option<&str> {
        self.inner().detector_url.as_deref()
    }

    pub fn detector_timeout_secs(&self) -> u64 {
        self.inner().detector_timeout_secs
    }

    pub fn vocabulary_strict(&self) -> bool {
        self.inner().vocabulary_strict
    }

    pub fn cameras_config_path(&self) -> Option<&PathBuf> {
        self.inner().cameras_config_path.as_ref()
    }

    pub fn capture_size(&self) -> (u32, u32) {
        (self.inner().capture_width, self.inner().capture_height)
    }

    /// Initial detector tunables; mutable at runtime through `/model/config`
    pub fn detector_settings(&self) -> DetectorSettings {
        self.inner().detector_settings()
    }
}

fn is_production_env(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl DetectionServiceConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const MAX_UPLOAD_SIZE_MB: u64 = 500;
        const MAX_CHUNK_SIZE_MB: usize = 16;
        const MAX_TOTAL_CHUNKS: u32 = 10_000;
        const UPLOAD_TTL_SECS: u64 = 3600;
        const VIDEO_SAMPLE_FPS: f32 = 1.0;
        const VIDEO_MAX_SAMPLED_FRAMES: usize = 300;
        const MAX_CONCURRENT_JOBS: usize = 2;
        const JOB_QUEUE_SIZE: usize = 100;
        const JOB_RETENTION_SECS: u64 = 900;
        const DETECTOR_TIMEOUT_SECS: u64 = 30;
        const MIN_CONFIDENCE: f32 = 0.25;
        const UMBRAL_AGRUPACION: f32 = 50.0;
        const CAPTURE_WIDTH: u32 = 1280;
        const CAPTURE_HEIGHT: u32 = 720;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        if is_production_env(&environment) && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: env_or("PORT", SERVER_PORT),
            cors_origins,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            environment,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            http_concurrency_limit: env_or("HTTP_CONCURRENCY_LIMIT", HTTP_CONCURRENCY_LIMIT),
        };

        let store_backend = match env_opt("STORE_BACKEND") {
            Some(value) => value.parse::<StoreBackend>()?,
            None => StoreBackend::Postgres,
        };

        let modo_deteccion = match env_opt("MODO_DETECCION") {
            Some(value) => value
                .parse::<DetectionMode>()
                .map_err(|e| anyhow::anyhow!("Invalid MODO_DETECCION: {}", e))?,
            None => DetectionMode::Enhanced,
        };

        let max_upload_size_mb: u64 = env_or("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB);
        let max_chunk_size_mb: usize = env_or("MAX_CHUNK_SIZE_MB", MAX_CHUNK_SIZE_MB);

        Ok(Self {
            base,
            store_backend,
            database_url: env_opt("DATABASE_URL"),
            local_storage_path: PathBuf::from(
                env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./data".to_string()),
            ),
            media_base_url: env::var("MEDIA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000/media".to_string()),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            max_chunk_size_bytes: max_chunk_size_mb * 1024 * 1024,
            max_total_chunks: env_or("MAX_TOTAL_CHUNKS", MAX_TOTAL_CHUNKS),
            upload_ttl_secs: env_or("UPLOAD_TTL_SECS", UPLOAD_TTL_SECS),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            video_sample_fps: env_or("VIDEO_SAMPLE_FPS", VIDEO_SAMPLE_FPS),
            video_max_sampled_frames: env_or("VIDEO_MAX_SAMPLED_FRAMES", VIDEO_MAX_SAMPLED_FRAMES),
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", MAX_CONCURRENT_JOBS),
            job_queue_size: env_or("JOB_QUEUE_SIZE", JOB_QUEUE_SIZE),
            job_retention_secs: env_or("JOB_RETENTION_SECS", JOB_RETENTION_SECS),
            detector_url: env_opt("DETECTOR_URL").map(|u| u.trim_end_matches('/').to_string()),
            detector_timeout_secs: env_or("DETECTOR_TIMEOUT_SECS", DETECTOR_TIMEOUT_SECS),
            min_confidence: env_or("MIN_CONFIDENCE", MIN_CONFIDENCE),
            umbral_agrupacion: env_or("UMBRAL_AGRUPACION", UMBRAL_AGRUPACION),
            usar_agrupacion: env_or("USAR_AGRUPACION", true),
            modo_deteccion,
            vocabulary_strict: env_or("VOCABULARY_STRICT", true),
            cameras_config_path: env_opt("CAMERAS_CONFIG_PATH").map(PathBuf::from),
            capture_width: env_or("CAPTURE_WIDTH", CAPTURE_WIDTH),
            capture_height: env_or("CAPTURE_HEIGHT", CAPTURE_HEIGHT),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.store_backend == StoreBackend::Postgres {
            match self.database_url.as_deref() {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {}
                Some(_) => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be set when STORE_BACKEND=postgres"
                    ))
                }
            }
        }

        self.detector_settings().validate().map_err(|e| {
            anyhow::anyhow!("Invalid detector configuration: {}", e)
        })?;

        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("MAX_CONCURRENT_JOBS must be at least 1"));
        }
        if self.job_queue_size == 0 {
            return Err(anyhow::anyhow!("JOB_QUEUE_SIZE must be at least 1"));
        }
        if self.max_total_chunks == 0 {
            return Err(anyhow::anyhow!("MAX_TOTAL_CHUNKS must be at least 1"));
        }
        if self.base.http_concurrency_limit == 0 {
            return Err(anyhow::anyhow!("HTTP_CONCURRENCY_LIMIT must be at least 1"));
        }
        if self.max_chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_CHUNK_SIZE_MB must be at least 1"));
        }
        if !(self.video_sample_fps > 0.0) {
            return Err(anyhow::anyhow!("VIDEO_SAMPLE_FPS must be positive"));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(anyhow::anyhow!("CAPTURE_WIDTH and CAPTURE_HEIGHT must be non-zero"));
        }

        Ok(())
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            min_confidence: self.min_confidence,
            umbral_agrupacion: self.umbral_agrupacion,
            usar_agrupacion: self.usar_agrupacion,
            modo_deteccion: self.modo_deteccion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DetectionServiceConfig {
        DetectionServiceConfig {
            base: BaseConfig {
                server_port: 8000,
                cors_origins: vec!["*".to_string()],
                db_max_connections: 5,
                db_timeout_seconds: 5,
                environment: "development".to_string(),
                log_format: "text".to_string(),
                http_concurrency_limit: 10_000,
            },
            store_backend: StoreBackend::Memory,
            database_url: None,
            local_storage_path: PathBuf::from("./data"),
            media_base_url: "http://localhost:8000/media".to_string(),
            max_upload_size_bytes: 500 * 1024 * 1024,
            max_chunk_size_bytes: 16 * 1024 * 1024,
            max_total_chunks: 10_000,
            upload_ttl_secs: 3600,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            video_sample_fps: 1.0,
            video_max_sampled_frames: 300,
            max_concurrent_jobs: 2,
            job_queue_size: 100,
            job_retention_secs: 900,
            detector_url: None,
            detector_timeout_secs: 30,
            min_confidence: 0.25,
            umbral_agrupacion: 50.0,
            usar_agrupacion: true,
            modo_deteccion: DetectionMode::Enhanced,
            vocabulary_strict: true,
            cameras_config_path: None,
            capture_width: 1280,
            capture_height: 720,
        }
    }

    #[test]
    fn memory_backend_needs_no_database_url() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let mut cfg = sample();
        cfg.store_backend = StoreBackend::Postgres;
        assert!(cfg.validate().is_err());

        cfg.database_url = Some("mysql://nope".to_string());
        assert!(cfg.validate().is_err());

        cfg.database_url = Some("postgresql://localhost/vagonetas".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_min_confidence() {
        let mut cfg = sample();
        cfg.min_confidence = 0.05;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn store_backend_parses_aliases() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(
            "PostgreSQL".parse::<StoreBackend>().unwrap(),
            StoreBackend::Postgres
        );
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn production_detection() {
        let mut cfg = sample();
        cfg.base.environment = "prod".to_string();
        assert!(Config(Box::new(cfg)).is_production());
    }

    #[test]
    fn zero_http_concurrency_limit_is_rejected() {
        let mut cfg = sample();
        cfg.base.http_concurrency_limit = 0;
        assert!(cfg.validate().is_err());

        cfg.base.http_concurrency_limit = 64;
        assert!(cfg.validate().is_ok());
        assert_eq!(Config(Box::new(cfg)).http_concurrency_limit(), 64);
    }
}
