use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;

use super::record::Evento;

/// Kind of capture source behind a camera id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Local capture device, addressed by index
    Camera,
    /// Network stream
    Rtsp,
    /// Video file on disk
    #[serde(alias = "video-file", alias = "video_file")]
    Video,
}

/// Device index or URL/path, depending on `SourceType`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(untagged)]
pub enum CameraUrl {
    Index(u32),
    Url(String),
}

impl Display for CameraUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CameraUrl::Index(i) => write!(f, "{}", i),
            CameraUrl::Url(u) => f.write_str(u),
        }
    }
}

/// Region of interest within the captured frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Static description of a capture source.
///
/// Read-only for a running monitor session; changes need a stop/start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct CameraConfig {
    pub camera_id: String,
    pub source_type: SourceType,
    pub camera_url: CameraUrl,
    pub evento: Evento,
    #[serde(default)]
    pub tunel: Option<String>,
    #[serde(default)]
    pub roi: Option<Roi>,
    #[serde(default = "default_motion_sensitivity")]
    pub motion_sensitivity: f32,
    #[serde(default = "default_min_motion_area")]
    pub min_motion_area: u32,
    #[serde(default = "default_cooldown", alias = "detection_cooldown")]
    pub detection_cooldown_secs: f64,
    #[serde(default = "default_fps_limit")]
    pub fps_limit: f32,
    #[serde(default)]
    pub loop_video: bool,
}

fn default_motion_sensitivity() -> f32 {
    0.3
}

fn default_min_motion_area() -> u32 {
    5000
}

fn default_cooldown() -> f64 {
    5.0
}

fn default_fps_limit() -> f32 {
    5.0
}

impl CameraConfig {
    /// Input argument handed to ffmpeg for this source.
    pub fn ffmpeg_input(&self) -> String {
        match (&self.source_type, &self.camera_url) {
            (SourceType::Camera, CameraUrl::Index(i)) => format!("/dev/video{}", i),
            (_, url) => url.to_string(),
        }
    }

    pub fn is_file_source(&self) -> bool {
        self.source_type == SourceType::Video
    }

    /// Built-in sources used when no camera file is configured.
    pub fn defaults() -> Vec<CameraConfig> {
        vec![
            CameraConfig {
                camera_id: "video_demo_enteros".to_string(),
                source_type: SourceType::Video,
                camera_url: CameraUrl::Url("./data/demo/CarroNenteros800.mp4".to_string()),
                evento: Evento::Ingreso,
                tunel: Some("Demo Túnel - Números Enteros".to_string()),
                roi: None,
                motion_sensitivity: 0.2,
                min_motion_area: 3000,
                detection_cooldown_secs: 1.0,
                fps_limit: 10.0,
                loop_video: true,
            },
            CameraConfig {
                camera_id: "cam_ingreso_1".to_string(),
                source_type: SourceType::Camera,
                camera_url: CameraUrl::Index(0),
                evento: Evento::Ingreso,
                tunel: Some("Túnel 1".to_string()),
                roi: None,
                motion_sensitivity: 0.3,
                min_motion_area: 8000,
                detection_cooldown_secs: 5.0,
                fps_limit: default_fps_limit(),
                loop_video: false,
            },
            CameraConfig {
                camera_id: "cam_egreso_1".to_string(),
                source_type: SourceType::Camera,
                camera_url: CameraUrl::Index(1),
                evento: Evento::Egreso,
                tunel: Some("Túnel 1".to_string()),
                roi: None,
                motion_sensitivity: 0.2,
                min_motion_area: 6000,
                detection_cooldown_secs: 4.0,
                fps_limit: default_fps_limit(),
                loop_video: false,
            },
        ]
    }
}
