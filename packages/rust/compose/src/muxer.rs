//! Encoders that execute a [`MuxJob`].

use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, instrument};

use storyreel_shared::{Result, StoryReelError};

use crate::job::MuxJob;

/// Lines of encoder stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Executes a mux job, writing `job.output`.
pub trait Muxer: Send + Sync {
    fn mux(&self, job: &MuxJob) -> impl Future<Output = Result<()>> + Send;
}

/// Runs jobs through an `ffmpeg` subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    ffmpeg_bin: String,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Muxer for FfmpegMuxer {
    #[instrument(skip_all, fields(bin = %self.ffmpeg_bin, clips = job.clips.len()))]
    async fn mux(&self, job: &MuxJob) -> Result<()> {
        let args = job.to_ffmpeg_args();
        debug!(args = args.len(), "spawning encoder");

        let output = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                StoryReelError::composition(format!(
                    "failed to run {}: {e}. Is ffmpeg installed?",
                    self.ffmpeg_bin
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr_tail(&stderr);
            error!(status = %output.status, "encoder failed");
            return Err(StoryReelError::composition(format!(
                "ffmpeg exited with {}: {tail}",
                output.status
            )));
        }

        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
