//! Frame extraction.
//!
//! Images decode to a single frame. Videos and live sources are decoded by
//! ffmpeg into raw RGB24 frames read from its stdout one at a time, so only
//! the current frame is held in memory. File videos are sampled at a bounded
//! rate and capped to a maximum number of frames.

use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use vagon_core::models::{CameraConfig, MediaKind, Roi, SourceType};
use vagon_core::AppError;

const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported or corrupt image: {0}")]
    Image(String),

    #[error("Unsupported or corrupt video: {0}")]
    Video(String),

    #[error("No video stream found")]
    NoVideoStream,

    #[error("Failed to run {tool}: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Tool { .. } | DecodeError::Io(_) => AppError::Internal(err.to_string()),
            other => AppError::Decode(other.to_string()),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the sampled sequence, starting at 0
    pub index: u64,
    /// Offset into the source in seconds, when known
    pub position_secs: f64,
    pub image: RgbImage,
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| DecodeError::Image(e.to_string()))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf.into_inner())
}

/// Crop to a region of interest, clamped to the image bounds.
pub fn crop_roi(image: &RgbImage, roi: &Roi) -> RgbImage {
    let x = roi.x.min(image.width().saturating_sub(1));
    let y = roi.y.min(image.height().saturating_sub(1));
    let width = roi.width.min(image.width() - x).max(1);
    let height = roi.height.min(image.height() - y).max(1);
    image::imageops::crop_imm(image, x, y, width, height).to_image()
}

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
    pub frame_rate: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FrameExtractorConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Frames per second sampled from file videos
    pub sample_fps: f32,
    pub max_sampled_frames: usize,
}

impl Default for FrameExtractorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            sample_fps: 1.0,
            max_sampled_frames: 300,
        }
    }
}

/// Finite, single-use sequence of frames from one source.
pub struct FrameSequence {
    inner: SequenceInner,
    total_hint: Option<u64>,
}

enum SequenceInner {
    Single(Option<Frame>),
    Stream(Box<FrameStream>),
}

impl FrameSequence {
    pub fn single(image: RgbImage) -> Self {
        Self {
            inner: SequenceInner::Single(Some(Frame {
                index: 0,
                position_secs: 0.0,
                image,
            })),
            total_hint: Some(1),
        }
    }

    /// Expected number of frames, when the source length is known
    pub fn total_hint(&self) -> Option<u64> {
        self.total_hint
    }

    pub async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        match &mut self.inner {
            SequenceInner::Single(frame) => Ok(frame.take()),
            SequenceInner::Stream(stream) => stream.next_frame().await,
        }
    }
}

/// Raw frames read from a running ffmpeg process.
pub struct FrameStream {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    fps: f32,
    next_index: u64,
    limit: Option<u64>,
    finished: bool,
}

impl FrameStream {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        if self.limit.is_some_and(|limit| self.next_index >= limit) {
            self.finish(false).await?;
            return Ok(None);
        }

        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; frame_len];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finish(true).await?;
                return Ok(None);
            }
            Err(e) => return Err(DecodeError::Io(e)),
        }

        let image = RgbImage::from_raw(self.width, self.height, buf).ok_or_else(|| {
            DecodeError::Video("frame buffer does not match the reported size".to_string())
        })?;

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame {
            index,
            position_secs: index as f64 / self.fps.max(f32::EPSILON) as f64,
            image,
        }))
    }

    /// Stop ffmpeg and reap it. A stream that already ended is left as is.
    pub async fn close(mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "ffmpeg had already exited");
        }
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
    }

    /// Reap ffmpeg. At end of output a non-zero exit means the input could
    /// not be decoded; stopping early on our side is not an error.
    async fn finish(&mut self, reached_eof: bool) -> Result<(), DecodeError> {
        self.finished = true;
        if !reached_eof {
            let _ = self.child.start_kill();
        }
        let status = self.child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if reached_eof && !status.success() {
            tracing::warn!(status = ?status.code(), stderr = %stderr, "ffmpeg exited with error");
            return Err(DecodeError::Video(if stderr.trim().is_empty() {
                format!("ffmpeg exited with status {:?}", status.code())
            } else {
                stderr.trim().to_string()
            }));
        }
        Ok(())
    }
}

/// Keep the tail of a child's stderr without letting the pipe fill up.
fn collect_stderr<R>(mut stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

fn parse_frame_rate(value: &str) -> Option<f32> {
    let (num, den) = value.split_once('/')?;
    let num: f32 = num.parse().ok()?;
    let den: f32 = den.parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// ffmpeg treats a leading '-' as an option
fn check_input(input: &str) -> Result<(), DecodeError> {
    if input.is_empty() || input.starts_with('-') {
        return Err(DecodeError::Video(format!("invalid input '{}'", input)));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FrameExtractor {
    config: FrameExtractorConfig,
}

impl FrameExtractor {
    pub fn new(config: FrameExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameExtractorConfig {
        &self.config
    }

    /// Open an assembled upload as a frame sequence.
    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    pub async fn extract(&self, path: &Path, kind: MediaKind) -> Result<FrameSequence, DecodeError> {
        match kind {
            MediaKind::Image => {
                let bytes = tokio::fs::read(path).await?;
                let image = tokio::task::spawn_blocking(move || decode_image(&bytes))
                    .await
                    .map_err(|e| DecodeError::Image(format!("decode task failed: {}", e)))??;
                Ok(FrameSequence::single(image))
            }
            MediaKind::Video => self.extract_video(path).await,
        }
    }

    async fn extract_video(&self, path: &Path) -> Result<FrameSequence, DecodeError> {
        let info = self.inspect(path).await?;
        let fps = self.config.sample_fps;
        let max_frames = self.config.max_sampled_frames as u64;

        let input = path.to_string_lossy().to_string();
        check_input(&input)?;

        let args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
            "-noautorotate".into(),
            "-i".into(),
            input,
            "-vf".into(),
            format!("fps={}", fps),
            "-frames:v".into(),
            max_frames.to_string(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "pipe:1".into(),
        ];

        let stream = self
            .spawn_ffmpeg(&args, info.width, info.height, fps, Some(max_frames))
            .await?;

        let total_hint = info
            .duration_secs
            .map(|d| ((d * fps as f64).ceil() as u64).clamp(1, max_frames));

        tracing::info!(
            width = info.width,
            height = info.height,
            duration_secs = ?info.duration_secs,
            sample_fps = fps,
            total_hint = ?total_hint,
            "Video decoding started"
        );

        Ok(FrameSequence {
            inner: SequenceInner::Stream(Box::new(stream)),
            total_hint,
        })
    }

    /// Open a camera, network stream or looping video file at the camera's
    /// frame rate, scaled to the capture size.
    #[tracing::instrument(skip(self, camera), fields(camera_id = %camera.camera_id))]
    pub async fn open_camera(
        &self,
        camera: &CameraConfig,
        capture_size: (u32, u32),
    ) -> Result<FrameStream, DecodeError> {
        let input = camera.ffmpeg_input();
        check_input(&input)?;
        let fps = if camera.fps_limit > 0.0 {
            camera.fps_limit
        } else {
            5.0
        };
        let (width, height) = capture_size;

        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
        ];
        match camera.source_type {
            SourceType::Camera => {
                args.extend(["-f".into(), "v4l2".into(), "-framerate".into(), fps.to_string()]);
            }
            SourceType::Rtsp => {
                args.extend(["-rtsp_transport".into(), "tcp".into()]);
            }
            SourceType::Video => {}
        }
        args.extend([
            "-i".into(),
            input,
            "-vf".into(),
            format!("fps={},scale={}:{}", fps, width, height),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "pipe:1".into(),
        ]);

        self.spawn_ffmpeg(&args, width, height, fps, None).await
    }

    async fn spawn_ffmpeg(
        &self,
        args: &[String],
        width: u32,
        height: u32,
        fps: f32,
        limit: Option<u64>,
    ) -> Result<FrameStream, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::Video("video has zero-sized frames".to_string()));
        }

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DecodeError::Tool {
                tool: "ffmpeg",
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DecodeError::Tool {
            tool: "ffmpeg",
            message: "stdout not captured".to_string(),
        })?;
        let stderr_task = child.stderr.take().map(collect_stderr);

        Ok(FrameStream {
            child,
            stdout,
            stderr_task,
            width,
            height,
            fps,
            next_index: 0,
            limit,
            finished: false,
        })
    }

    #[tracing::instrument(skip(self), fields(
        process.executable.name = "ffprobe",
        ffmpeg.operation = "inspect"
    ))]
    pub async fn inspect(&self, path: &Path) -> Result<VideoInfo, DecodeError> {
        let input = path.to_string_lossy().to_string();
        check_input(&input)?;

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(&input)
            .output()
            .await
            .map_err(|e| DecodeError::Tool {
                tool: "ffprobe",
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(DecodeError::Video(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let info_json: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DecodeError::Video(format!("unreadable ffprobe output: {}", e)))?;

        let stream = info_json["streams"]
            .get(0)
            .ok_or(DecodeError::NoVideoStream)?;

        let width = stream["width"].as_u64().unwrap_or(0) as u32;
        let height = stream["height"].as_u64().unwrap_or(0) as u32;
        if width == 0 || height == 0 {
            return Err(DecodeError::NoVideoStream);
        }

        let duration_secs = info_json["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok());
        let frame_rate = stream["r_frame_rate"].as_str().and_then(parse_frame_rate);

        Ok(VideoInfo {
            width,
            height,
            duration_secs,
            frame_rate,
        })
    }

    /// Whether the configured ffmpeg binary runs at all
    pub async fn ffmpeg_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([10, 200, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn image_extracts_single_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart.png");
        tokio::fs::write(&path, png_bytes(8, 6)).await.unwrap();

        let extractor = FrameExtractor::new(FrameExtractorConfig::default());
        let mut seq = extractor.extract(&path, MediaKind::Image).await.unwrap();
        assert_eq!(seq.total_hint(), Some(1));

        let frame = seq.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.index, 0);
        assert_eq!(frame.image.dimensions(), (8, 6));
        assert!(seq.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_image_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        tokio::fs::write(&path, b"definitely not a jpeg").await.unwrap();

        let extractor = FrameExtractor::new(FrameExtractorConfig::default());
        let result = extractor.extract(&path, MediaKind::Image).await;
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    #[test]
    fn crop_is_clamped_to_bounds() {
        let img = RgbImage::new(100, 50);
        let roi = Roi {
            x: 80,
            y: 40,
            width: 100,
            height: 100,
        };
        assert_eq!(crop_roi(&img, &roi).dimensions(), (20, 10));
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let img = RgbImage::from_pixel(16, 12, Rgb([120, 120, 120]));
        let jpeg = encode_jpeg(&img, 85).unwrap();
        assert_eq!(decode_image(&jpeg).unwrap().dimensions(), (16, 12));
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn decode_errors_map_to_app_errors() {
        let err: AppError = DecodeError::NoVideoStream.into();
        assert!(matches!(err, AppError::Decode(_)));
        let err: AppError = DecodeError::Tool {
            tool: "ffmpeg",
            message: "not found".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[cfg(target_os = "linux")]
    fn fake_ffmpeg(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn close_kills_and_reaps_a_live_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FrameExtractor::new(FrameExtractorConfig {
            ffmpeg_path: fake_ffmpeg(dir.path(), "head -c 12 /dev/zero\nexec sleep 30\n"),
            ..Default::default()
        });
        let mut stream = extractor
            .spawn_ffmpeg(&[], 2, 2, 5.0, None)
            .await
            .unwrap();
        assert!(stream.next_frame().await.unwrap().is_some());

        let pid = stream.child.id().unwrap();
        stream.close().await;
        assert!(!Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn exit_after_frames_surfaces_at_end_of_output() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FrameExtractor::new(FrameExtractorConfig {
            ffmpeg_path: fake_ffmpeg(
                dir.path(),
                "head -c 24 /dev/zero\necho 'moov atom not found' >&2\nexit 1\n",
            ),
            ..Default::default()
        });
        let mut stream = extractor
            .spawn_ffmpeg(&[], 2, 2, 5.0, None)
            .await
            .unwrap();

        assert!(stream.next_frame().await.unwrap().is_some());
        assert!(stream.next_frame().await.unwrap().is_some());
        let err = stream.next_frame().await.unwrap_err();
        assert!(err.to_string().contains("moov atom not found"));
        // Closing an ended stream is a no-op
        stream.close().await;
    }
}
