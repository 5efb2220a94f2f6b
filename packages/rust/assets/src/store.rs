//! Atomic file writes for generated assets.

use std::path::Path;

use sha2::{Digest, Sha256};

use storyreel_shared::StoryReelError;

/// Write `bytes` to a hidden temp file next to `target`, then rename into
/// place. Creates the parent directory if absent.
pub(crate) async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), StoryReelError> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoryReelError::io(dir, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.tmp"));

    if let Err(e) = tokio::fs::write(&temp, bytes).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(StoryReelError::io(&temp, e));
    }
    tokio::fs::rename(&temp, target)
        .await
        .map_err(|e| StoryReelError::io(target, e))
}

/// Lower-case hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
