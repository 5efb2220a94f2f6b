//! Per-run scratch directory for intermediate narration audio.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use storyreel_shared::{Result, RunId, StoryReelError};

/// `<root>/storyreel-run-<run_id>/`, removed when closed or dropped.
#[derive(Debug)]
pub struct RunWorkspace {
    path: PathBuf,
    removed: bool,
}

impl RunWorkspace {
    pub fn create(root: &Path, run_id: RunId) -> Result<Self> {
        let path = root.join(format!("storyreel-run-{run_id}"));
        let audio = path.join("audio");
        std::fs::create_dir_all(&audio).map_err(|e| StoryReelError::io(&audio, e))?;
        debug!(path = %path.display(), "run workspace created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.path.join("audio")
    }

    /// Remove the directory and everything in it.
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "run workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove run workspace"),
        }
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        self.remove();
    }
}
