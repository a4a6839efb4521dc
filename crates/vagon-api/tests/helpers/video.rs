//! Shell-script stand-ins for ffprobe and ffmpeg.
//!
//! The fake ffprobe reports a fixed frame size and the fake ffmpeg writes
//! blank RGB24 frames of that size to stdout, so video jobs run end to end
//! without real media. Unix only.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub const FRAME_WIDTH: u32 = 160;
pub const FRAME_HEIGHT: u32 = 120;
const FRAME_BYTES: usize = (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize;

/// What the fake ffmpeg does after writing its frames.
pub enum AfterFrames {
    /// Exit cleanly
    End,
    /// Print to stderr and exit with status 1
    Fail(&'static str),
    /// Stay alive without writing more
    Stall,
}

pub struct FakeVideoTools {
    _dir: TempDir,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FakeVideoTools {
    pub fn new(frames: usize, after: AfterFrames) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create tool directory");

        let ffprobe = write_script(
            dir.path(),
            "ffprobe",
            &format!(
                "cat <<'JSON'\n{{\"streams\":[{{\"width\":{},\"height\":{},\"r_frame_rate\":\"1/1\"}}],\"format\":{{\"duration\":\"{}.0\"}}}}\nJSON\n",
                FRAME_WIDTH,
                FRAME_HEIGHT,
                frames.max(1)
            ),
        );

        let mut body = format!("head -c {} /dev/zero\n", frames * FRAME_BYTES);
        match after {
            AfterFrames::End => {}
            AfterFrames::Fail(stderr) => {
                body.push_str(&format!("echo '{}' >&2\nexit 1\n", stderr));
            }
            AfterFrames::Stall => body.push_str("exec sleep 30\n"),
        }
        let ffmpeg = write_script(dir.path(), "ffmpeg", &body);

        Self {
            _dir: dir,
            ffmpeg,
            ffprobe,
        }
    }

    pub fn ffmpeg_path(&self) -> String {
        self.ffmpeg.to_string_lossy().into_owned()
    }

    pub fn ffprobe_path(&self) -> String {
        self.ffprobe.to_string_lossy().into_owned()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to mark script executable");
    path
}
