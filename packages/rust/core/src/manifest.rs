//! `<stem>.story.json` sidecar written next to a finished video.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use storyreel_shared::{Result, RunManifest, StoryReelError};

/// Manifest path for a video stem under `output_dir`.
pub fn manifest_path(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(format!("{stem}.story.json"))
}

/// Write `manifest` as pretty JSON, via a temp file and rename.
#[instrument(skip_all, fields(run_id = %manifest.run_id))]
pub fn write_manifest(output_dir: &Path, manifest: &RunManifest) -> Result<PathBuf> {
    let path = manifest_path(output_dir, &manifest.story.file_stem());
    let json = serde_json::to_string_pretty(manifest).map_err(|e| {
        StoryReelError::composition(format!("manifest serialization failed: {e}"))
    })?;

    let tmp = output_dir.join(format!(".{}.tmp", manifest.story.file_stem()));
    std::fs::write(&tmp, json).map_err(|e| StoryReelError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(StoryReelError::io(&path, e));
    }

    debug!(path = %path.display(), "wrote manifest");
    Ok(path)
}

/// Read a manifest back.
pub fn read_manifest(path: &Path) -> Result<RunManifest> {
    let raw = std::fs::read_to_string(path).map_err(|e| StoryReelError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| {
        StoryReelError::config(format!("invalid manifest {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use storyreel_shared::{CURRENT_SCHEMA_VERSION, RunId, Segment, StoryDocument};

    use super::*;

    #[test]
    fn writes_and_reads_back() {
        let dir = std::env::temp_dir().join(format!("storyreel_manifest_test_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("mkdir");

        let mut seg = Segment::planned("The sea was calm.", "calm sea", 30.0);
        seg.actual_narration_duration_secs = Some(28.5);
        let story = StoryDocument::new("Calm Sea", vec![seg]);
        let manifest = RunManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: RunId::new(),
            idea: "calm sea".into(),
            tool_version: "0.1.0".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            video_path: dir.join("calm_sea.mp4"),
            rendered_duration_secs: 28.5,
            story,
        };

        let path = write_manifest(&dir, &manifest).expect("write");
        assert!(path.ends_with("calm_sea.story.json"));

        let back = read_manifest(&path).expect("read");
        assert_eq!(back.run_id, manifest.run_id);
        assert_eq!(back.story.segments[0].actual_narration_duration_secs, Some(28.5));

        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
