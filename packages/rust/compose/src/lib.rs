//! Composition engine: turns a fully enriched [`StoryDocument`] into one
//! muxed video.
//!
//! Each segment becomes a still clip lasting its measured narration length.
//! Neighbouring clips crossfade, so the video runs
//! `sum(d_i) - (n-1) * crossfade` seconds. Captions (optional) are burned in
//! bottom-centre and narration tracks are faded and mixed at their clip
//! starts. The encoder writes to a hidden partial file that is renamed into
//! place only after a successful mux.

mod caption;
mod job;
mod muxer;
mod timeline;

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use storyreel_shared::{AppConfig, Result, StoryDocument, StoryReelError};

pub use caption::{CaptionStyle, drawtext_filter, wrap_caption};
pub use job::{ClipSource, EncodingSettings, MuxJob};
pub use muxer::{FfmpegMuxer, Muxer};
pub use timeline::{ClipPlacement, Timeline};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Runtime composition settings, merged from config + CLI flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeSettings {
    pub encoding: EncodingSettings,
    /// Requested overlap between adjacent clips.
    pub crossfade_secs: f64,
    /// Fade at both ends of every narration track.
    pub audio_fade_secs: f64,
    /// Caption appearance; `None` disables captions.
    pub captions: Option<CaptionStyle>,
}

impl ComposeSettings {
    /// Same settings with captions turned off.
    pub fn without_captions(mut self) -> Self {
        self.captions = None;
        self
    }
}

impl From<&AppConfig> for ComposeSettings {
    fn from(config: &AppConfig) -> Self {
        let enc = &config.encoding;
        let timing = &config.timing;
        Self {
            encoding: EncodingSettings {
                width: enc.width,
                height: enc.height,
                fps: enc.fps,
                video_codec: enc.video_codec.clone(),
                audio_codec: enc.audio_codec.clone(),
                video_bitrate: enc.video_bitrate.clone(),
                audio_bitrate: enc.audio_bitrate.clone(),
                preset: enc.preset.clone(),
                threads: enc.threads,
            },
            crossfade_secs: timing.crossfade_secs,
            audio_fade_secs: timing.audio_fade_secs,
            captions: config.defaults.captions.then(|| CaptionStyle {
                wrap_width: timing.caption_wrap_width,
                font_size: timing.caption_font_size,
                font_file: timing.caption_font_file.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A finished video.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedVideo {
    pub path: PathBuf,
    /// Rendered length after crossfade overlap.
    pub duration_secs: f64,
    pub segment_count: usize,
}

/// Assembles segment clips and drives a [`Muxer`].
#[derive(Debug, Clone)]
pub struct CompositionEngine<M> {
    muxer: M,
    settings: ComposeSettings,
}

impl<M: Muxer> CompositionEngine<M> {
    pub fn new(muxer: M, settings: ComposeSettings) -> Self {
        Self { muxer, settings }
    }

    pub fn settings(&self) -> &ComposeSettings {
        &self.settings
    }

    pub fn muxer(&self) -> &M {
        &self.muxer
    }

    /// Render `document` to `<output_base_dir>/<sanitized_title>.mp4`.
    ///
    /// Every segment must carry its image, narration audio and measured
    /// duration; otherwise nothing is written and a
    /// [`StoryReelError::CompositionPrecondition`] names the first gap.
    #[instrument(skip_all, fields(title = %document.title, segments = document.segments.len()))]
    pub async fn compose(
        &self,
        document: &StoryDocument,
        output_base_dir: &Path,
    ) -> Result<ComposedVideo> {
        let started = Instant::now();
        let inputs = check_preconditions(document)?;

        let durations: Vec<f64> = inputs.iter().map(|i| i.duration_secs).collect();
        let timeline = Timeline::build(&durations, self.settings.crossfade_secs);

        // Caption files live only as long as this call.
        let scratch = match &self.settings.captions {
            Some(_) => Some(ScratchDir::create()?),
            None => None,
        };

        let mut clips = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.into_iter().enumerate() {
            let caption_file = match (&scratch, &self.settings.captions) {
                (Some(dir), Some(style)) => {
                    let text = &document.segments[i].narration_text;
                    Some(dir.write_caption(i, &wrap_caption(text, style.wrap_width))?)
                }
                _ => None,
            };
            clips.push(ClipSource {
                image_path: input.image_path,
                audio_path: input.audio_path,
                duration_secs: input.duration_secs,
                caption_file,
            });
        }

        std::fs::create_dir_all(output_base_dir)
            .map_err(|e| StoryReelError::io(output_base_dir, e))?;
        let final_path = video_path(document, output_base_dir);
        let partial = PartialOutput::new(output_base_dir, &document.file_stem());

        let job = MuxJob::build(
            clips,
            &timeline,
            self.settings.encoding.clone(),
            self.settings.captions.as_ref(),
            self.settings.audio_fade_secs,
            partial.path(),
        );

        debug!(
            total_secs = timeline.total_secs,
            overlap_secs = timeline.overlap_secs,
            "timeline built"
        );

        self.muxer.mux(&job).await?;
        partial.commit(&final_path)?;
        drop(scratch);

        info!(
            path = ?final_path,
            duration_secs = timeline.total_secs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "video composed"
        );

        Ok(ComposedVideo {
            path: final_path,
            duration_secs: timeline.total_secs,
            segment_count: document.segments.len(),
        })
    }
}

/// Output path for `document` under `output_base_dir`. Existing files at
/// this path are overwritten.
pub fn video_path(document: &StoryDocument, output_base_dir: &Path) -> PathBuf {
    output_base_dir.join(format!("{}.mp4", document.file_stem()))
}

struct ClipInput {
    image_path: PathBuf,
    audio_path: PathBuf,
    duration_secs: f64,
}

fn check_preconditions(document: &StoryDocument) -> Result<Vec<ClipInput>> {
    if document.segments.is_empty() {
        return Err(StoryReelError::composition("story has no segments"));
    }

    document
        .segments
        .iter()
        .enumerate()
        .map(|(segment, seg)| {
            let missing = |what| StoryReelError::CompositionPrecondition {
                segment,
                missing: what,
            };
            let image_path = seg.image_path.clone().ok_or_else(|| missing("image_path"))?;
            let audio_path = seg
                .narration_audio_path
                .clone()
                .ok_or_else(|| missing("narration_audio_path"))?;
            let duration_secs = seg
                .actual_narration_duration_secs
                .filter(|d| d.is_finite() && *d > 0.0)
                .ok_or_else(|| missing("actual_narration_duration_secs"))?;

            if !image_path.is_file() {
                return Err(missing("image file"));
            }
            if !audio_path.is_file() {
                return Err(missing("narration audio file"));
            }

            Ok(ClipInput {
                image_path,
                audio_path,
                duration_secs,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scratch resources
// ---------------------------------------------------------------------------

/// Temporary directory for caption files, removed on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("storyreel-compose-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&path).map_err(|e| StoryReelError::io(&path, e))?;
        Ok(Self { path })
    }

    fn write_caption(&self, index: usize, lines: &[String]) -> Result<PathBuf> {
        let path = self.path.join(format!("caption_{index}.txt"));
        std::fs::write(&path, lines.join("\n")).map_err(|e| StoryReelError::io(&path, e))?;
        Ok(path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = ?self.path, error = %e, "failed to remove caption scratch dir");
        }
    }
}

/// The encoder's target file. Deleted on drop unless committed.
struct PartialOutput {
    path: PathBuf,
    committed: bool,
}

impl PartialOutput {
    fn new(dir: &Path, stem: &str) -> Self {
        Self {
            path: dir.join(format!(".{stem}.mp4.partial")),
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Move the finished output into place.
    fn commit(mut self, target: &Path) -> Result<()> {
        let len = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            return Err(StoryReelError::composition("encoder produced no output"));
        }
        std::fs::rename(&self.path, target).map_err(|e| StoryReelError::io(target, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
