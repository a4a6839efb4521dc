//! Shared key generation.

use uuid::Uuid;

/// Prefix holding every fragment of one upload.
pub fn chunk_prefix(file_id: &str) -> String {
    format!("chunks/{}", file_id)
}

pub fn chunk_key(file_id: &str, index: u32) -> String {
    format!("chunks/{}/{}.part", file_id, index)
}

/// Key of an assembled upload. The uuid keeps repeated uploads of the same
/// file name apart.
pub fn upload_key(original_filename: &str) -> String {
    format!(
        "uploads/{}_{}",
        Uuid::new_v4(),
        sanitize_filename(original_filename)
    )
}

/// Key of the frame stored for a processing job's persisted detection.
pub fn frame_key(processing_id: Uuid) -> String {
    format!("frames/{}.jpg", processing_id)
}

/// Strip directory components and replace anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload.bin".to_string()
    } else {
        trimmed.to_string()
    }
}
