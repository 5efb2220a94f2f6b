//! End-to-end `create` pipeline: idea → plan → images + narration → video.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use storyreel_assets::{
    AudioProbe, ImageAdapter, ImageService, NarrationAdapter, SpeechService, StoredImage,
};
use storyreel_compose::{ComposedVideo, CompositionEngine, Muxer};
use storyreel_planner::{NarrativePlanner, TextGenerationService};
use storyreel_shared::{
    CURRENT_SCHEMA_VERSION, PipelineConfig, Result, RunId, RunManifest, StoryDocument,
    StoryReelError,
};

use crate::cancel::{RunCancellation, StageStop};
use crate::manifest::write_manifest;
use crate::schedule::{FixedDelayScheduler, RetryPolicy, with_retries};
use crate::state::{RunState, StateMachine};
use crate::workspace::RunWorkspace;

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub video: ComposedVideo,
    /// The story with every segment's assets filled in.
    pub story: StoryDocument,
    pub manifest_path: PathBuf,
}

/// Everything a run reports back, success or not.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    /// Every state the run visited, in order.
    pub history: Vec<RunState>,
    pub outcome: Result<RunOutput>,
    pub elapsed: std::time::Duration,
}

impl RunReport {
    pub fn final_state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Planning)
    }

    pub fn into_result(self) -> Result<RunOutput> {
        self.outcome
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, state: RunState);
    /// Called once the story has been planned and validated.
    fn story_planned(&self, story: &StoryDocument);
    /// Called when a segment's image is stored. Order follows completion.
    fn image_done(&self, index: usize, total: usize);
    /// Called when a segment's narration is stored and measured.
    fn narration_done(&self, index: usize, total: usize, duration_secs: f64);
    /// Called when the run completes successfully.
    fn done(&self, output: &RunOutput);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _state: RunState) {}
    fn story_planned(&self, _story: &StoryDocument) {}
    fn image_done(&self, _index: usize, _total: usize) {}
    fn narration_done(&self, _index: usize, _total: usize, _duration_secs: f64) {}
    fn done(&self, _output: &RunOutput) {}
}

/// Per-segment assets collected at the composition barrier.
struct SegmentAssets {
    image: StoredImage,
    audio_path: PathBuf,
    duration_secs: f64,
}

/// Drives one idea through planning, asset generation and composition.
pub struct PipelineController<T, I, S, M> {
    planner: NarrativePlanner<T>,
    images: Arc<ImageAdapter<I>>,
    speech: S,
    composer: CompositionEngine<M>,
    probe: AudioProbe,
    config: PipelineConfig,
    scheduler: FixedDelayScheduler,
    temp_root: PathBuf,
}

impl<T, I, S, M> PipelineController<T, I, S, M>
where
    T: TextGenerationService,
    I: ImageService + 'static,
    S: SpeechService,
    M: Muxer,
{
    pub fn new(
        planner: NarrativePlanner<T>,
        image_service: I,
        speech: S,
        composer: CompositionEngine<M>,
        probe: AudioProbe,
        config: PipelineConfig,
    ) -> Self {
        Self {
            planner,
            images: Arc::new(ImageAdapter::new(image_service, config.images_dir())),
            speech,
            composer,
            probe,
            scheduler: FixedDelayScheduler::new(config.narration_spacing),
            config,
            temp_root: std::env::temp_dir(),
        }
    }

    /// Place run workspaces under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Plan a story for `idea` without generating any assets.
    pub async fn plan_only(&self, idea: &str) -> Result<StoryDocument> {
        self.plan(idea, &RunCancellation::new()).await
    }

    /// Planning with retries that stop once `cancel` fires.
    async fn plan(&self, idea: &str, cancel: &RunCancellation) -> Result<StoryDocument> {
        let stop = StageStop::new(cancel);
        with_retries(self.policy(self.config.planning_retries), &stop, "planning", || {
            self.planner.plan(idea)
        })
        .await
    }

    /// Run the full pipeline for `idea`.
    ///
    /// Returns exactly one video path on success. On failure or
    /// cancellation no video is left behind. The run's temporary directory
    /// is removed on every path.
    #[instrument(skip_all, fields(idea_chars = idea.len()))]
    pub async fn run(
        &self,
        idea: &str,
        progress: &dyn ProgressReporter,
        cancel: &RunCancellation,
    ) -> RunReport {
        let start = Instant::now();
        let run_id = RunId::new();
        let mut machine = StateMachine::new();

        info!(%run_id, "starting run");
        progress.phase(RunState::Planning);

        let outcome = match RunWorkspace::create(&self.temp_root, run_id) {
            Ok(workspace) => {
                let outcome = self
                    .drive(idea, run_id, &workspace, &mut machine, progress, cancel)
                    .await;
                workspace.close();
                outcome
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(output) => {
                progress.done(output);
                info!(
                    %run_id,
                    path = %output.video.path.display(),
                    duration_secs = output.video.duration_secs,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "run complete"
                );
            }
            Err(e) => {
                machine.fail();
                progress.phase(RunState::Failed);
                error!(%run_id, kind = e.kind(), error = %e, "run failed");
            }
        }

        RunReport {
            run_id,
            history: machine.into_history(),
            outcome,
            elapsed: start.elapsed(),
        }
    }

    async fn drive(
        &self,
        idea: &str,
        run_id: RunId,
        workspace: &RunWorkspace,
        machine: &mut StateMachine,
        progress: &dyn ProgressReporter,
        cancel: &RunCancellation,
    ) -> Result<RunOutput> {
        let started_at = Utc::now();

        // --- Phase 1: Planning ---
        ensure_running(cancel)?;
        let mut story = self.plan(idea, cancel).await?;
        progress.story_planned(&story);
        ensure_running(cancel)?;

        // --- Phase 2: Asset generation ---
        machine.transition(RunState::AssetGeneration)?;
        progress.phase(RunState::AssetGeneration);
        let assets = self
            .generate_assets(&story, &workspace.audio_dir(), progress, cancel)
            .await?;

        for (segment, asset) in story.segments.iter_mut().zip(assets) {
            segment.image_path = Some(asset.image.path);
            segment.image_sha256 = Some(asset.image.sha256);
            segment.narration_audio_path = Some(asset.audio_path);
            segment.actual_narration_duration_secs = Some(asset.duration_secs);
        }
        ensure_running(cancel)?;

        // --- Phase 3: Composition ---
        machine.transition(RunState::Composition)?;
        progress.phase(RunState::Composition);
        let video = self.composer.compose(&story, &self.config.output_dir).await?;

        // --- Phase 4: Manifest ---
        // Narration audio lives in the run workspace and is gone once the run returns.
        let mut recorded = story.clone();
        for segment in &mut recorded.segments {
            segment.narration_audio_path = None;
        }
        let manifest = RunManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id,
            idea: idea.trim().to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            video_path: video.path.clone(),
            rendered_duration_secs: video.duration_secs,
            story: recorded,
        };
        // A failed run leaves no video behind.
        let manifest_path = match write_manifest(&self.config.output_dir, &manifest) {
            Ok(path) => path,
            Err(e) => {
                if let Err(rm) = std::fs::remove_file(&video.path) {
                    warn!(path = %video.path.display(), error = %rm, "failed to remove video");
                }
                return Err(e);
            }
        };

        machine.transition(RunState::Done)?;
        progress.phase(RunState::Done);

        Ok(RunOutput {
            video,
            story,
            manifest_path,
        })
    }

    /// Generate every segment's image and narration. Images run concurrently
    /// up to the configured limit while narration runs serially; the first
    /// failure stops both from scheduling further calls.
    #[instrument(skip_all, fields(segments = story.segments.len()))]
    async fn generate_assets(
        &self,
        story: &StoryDocument,
        audio_dir: &Path,
        progress: &dyn ProgressReporter,
        cancel: &RunCancellation,
    ) -> Result<Vec<SegmentAssets>> {
        let stop = StageStop::new(cancel);
        let narration = NarrationAdapter::new(&self.speech, audio_dir, self.probe.clone());

        let (images, narrations) = tokio::join!(
            self.image_stage(story, &stop, progress),
            self.narration_stage(story, &narration, &stop, progress),
        );

        let (images, narrations) = match (images, narrations) {
            (Ok(images), Ok(narrations)) => (images, narrations),
            (Err(a), Err(b)) => return Err(first_cause(a, b)),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e),
        };

        Ok(images
            .into_iter()
            .zip(narrations)
            .map(|(image, (audio_path, duration_secs))| SegmentAssets {
                image,
                audio_path,
                duration_secs,
            })
            .collect())
    }

    async fn image_stage(
        &self,
        story: &StoryDocument,
        stop: &StageStop,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<StoredImage>> {
        let total = story.segments.len();
        let semaphore = Arc::new(Semaphore::new(self.config.image_concurrency.max(1)));
        let policy = self.policy(self.config.image_retries);

        let mut tasks = JoinSet::new();
        let mut task_segments = HashMap::new();

        for (index, segment) in story.segments.iter().enumerate() {
            let adapter = Arc::clone(&self.images);
            let semaphore = Arc::clone(&semaphore);
            let stop = stop.clone();
            let prompt = segment.image_prompt.clone();

            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Err(StoryReelError::Cancelled);
                };
                if stop.is_stopped() {
                    return Err(StoryReelError::Cancelled);
                }
                with_retries(policy, &stop, "image", || adapter.resolve_image(&prompt, index)).await
            });
            task_segments.insert(handle.id(), index);
        }

        let mut stored: Vec<Option<StoredImage>> = vec![None; total];
        let mut failure: Option<StoryReelError> = None;

        while let Some(joined) = tasks.join_next_with_id().await {
            let (index, result) = match joined {
                Ok((id, result)) => (task_segments[&id], result),
                Err(e) => {
                    let index = task_segments[&e.id()];
                    (index, Err(StoryReelError::image(index, format!("image task failed: {e}"))))
                }
            };

            match result {
                Ok(image) => {
                    progress.image_done(index, total);
                    stored[index] = Some(image);
                }
                Err(StoryReelError::Cancelled) => {}
                Err(e) => {
                    if failure.is_none() {
                        warn!(segment = index, error = %e, "image failed, halting asset generation");
                        stop.halt();
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        stored
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(StoryReelError::Cancelled)
    }

    async fn narration_stage(
        &self,
        story: &StoryDocument,
        adapter: &NarrationAdapter<&S>,
        stop: &StageStop,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<(PathBuf, f64)>> {
        let total = story.segments.len();
        let policy = self.policy(self.config.narration_retries);
        let mut narrations = Vec::with_capacity(total);

        for (index, segment) in story.segments.iter().enumerate() {
            if stop.is_stopped() {
                return Err(StoryReelError::Cancelled);
            }

            let text = segment.narration_text.as_str();
            let result = with_retries(policy, stop, "narration", || async move {
                tokio::select! {
                    _ = self.scheduler.wait_turn() => {}
                    _ = stop.stopped() => return Err(StoryReelError::Cancelled),
                }
                adapter.synthesize_narration(text, index).await
            })
            .await;

            match result {
                Ok((path, duration_secs)) => {
                    progress.narration_done(index, total, duration_secs);
                    narrations.push((path, duration_secs));
                }
                Err(StoryReelError::Cancelled) => return Err(StoryReelError::Cancelled),
                Err(e) => {
                    warn!(segment = index, error = %e, "narration failed, halting asset generation");
                    stop.halt();
                    return Err(e);
                }
            }
        }

        Ok(narrations)
    }

    fn policy(&self, max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: self.config.retry_backoff,
        }
    }
}

fn ensure_running(cancel: &RunCancellation) -> Result<()> {
    if cancel.is_cancelled() {
        Err(StoryReelError::Cancelled)
    } else {
        Ok(())
    }
}

/// Of two stage errors, prefer the one that actually caused the halt.
fn first_cause(a: StoryReelError, b: StoryReelError) -> StoryReelError {
    match a {
        StoryReelError::Cancelled => b,
        _ => a,
    }
}
