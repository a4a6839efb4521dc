//! Host introspection for the camera system-info endpoint.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::{Disks, System};
use utoipa::ToSchema;

const MAX_VIDEO_DEVICES: u32 = 10;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub cpu_count: usize,
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    /// Free space on the disk holding the storage root, when known
    pub storage_free_bytes: Option<u64>,
}

impl SystemInfo {
    /// Blocking; call from `spawn_blocking` inside async code.
    pub fn collect(storage_root: &Path) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        let os = System::long_os_version()
            .or_else(System::name)
            .unwrap_or_else(|| std::env::consts::OS.to_string());

        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();

        Self {
            hostname,
            os,
            cpu_count: system.cpus().len(),
            total_memory_bytes: system.total_memory(),
            available_memory_bytes: system.available_memory(),
            storage_free_bytes: free_space_at(storage_root),
        }
    }
}

fn free_space_at(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    // Longest mount point that contains the path
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Video capture devices present under `/dev`.
pub fn detect_video_devices() -> Vec<String> {
    detect_video_devices_in(Path::new("/dev"))
}

fn detect_video_devices_in(dev: &Path) -> Vec<String> {
    (0..MAX_VIDEO_DEVICES)
        .map(|i| dev.join(format!("video{}", i)))
        .filter(|p: &PathBuf| p.exists())
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_basic_host_facts() {
        let dir = tempfile::tempdir().unwrap();
        let info = SystemInfo::collect(dir.path());
        assert!(!info.hostname.is_empty());
        assert!(!info.os.is_empty());
    }

    #[test]
    fn video_devices_are_listed_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video2"), b"").unwrap();
        std::fs::write(dir.path().join("video0"), b"").unwrap();
        std::fs::write(dir.path().join("audio0"), b"").unwrap();

        let devices = detect_video_devices_in(dir.path());
        assert_eq!(devices.len(), 2);
        assert!(devices[0].ends_with("video0"));
        assert!(devices[1].ends_with("video2"));
    }
}
