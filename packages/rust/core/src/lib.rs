//! Core pipeline orchestration for StoryReel.
//!
//! This crate ties together narrative planning, asset generation, and
//! composition into one controlled run: a state machine, a per-run temp
//! workspace, paced and bounded service calls, cooperative cancellation and
//! the run manifest.

pub mod cancel;
pub mod manifest;
pub mod pipeline;
pub mod schedule;
pub mod state;
pub mod workspace;

use storyreel_assets::{AudioProbe, ImageBackend, SpeechBackend};
use storyreel_compose::{ComposeSettings, CompositionEngine, FfmpegMuxer};
use storyreel_planner::{NarrativePlanner, TextBackend};
use storyreel_shared::{AppConfig, PipelineConfig, Result};

pub use cancel::RunCancellation;
pub use manifest::{manifest_path, read_manifest, write_manifest};
pub use pipeline::{
    PipelineController, ProgressReporter, RunOutput, RunReport, SilentProgress,
};
pub use schedule::{FixedDelayScheduler, RetryPolicy};
pub use state::{RunState, StateMachine};
pub use workspace::RunWorkspace;

/// A controller wired to the configured service backends and ffmpeg.
pub type StoryReel = PipelineController<TextBackend, ImageBackend, SpeechBackend, FfmpegMuxer>;

/// API keys resolved by the caller. `None` is fine for mock providers.
#[derive(Debug, Clone, Default)]
pub struct ServiceKeys {
    pub text: Option<String>,
    pub image: Option<String>,
    pub speech: Option<String>,
}

impl StoryReel {
    /// Build a controller from config. `pipeline` and `compose` carry any
    /// CLI overrides already merged in.
    pub fn from_config(
        config: &AppConfig,
        pipeline: PipelineConfig,
        compose: ComposeSettings,
        keys: ServiceKeys,
    ) -> Result<Self> {
        let text = TextBackend::from_config(&config.planner, keys.text)?;
        let images = ImageBackend::from_config(&config.image, keys.image)?;
        let speech = SpeechBackend::from_config(&config.narration, keys.speech)?;
        let composer = CompositionEngine::new(
            FfmpegMuxer::new(config.encoding.ffmpeg_bin.clone()),
            compose,
        );

        Ok(Self::new(
            NarrativePlanner::new(text),
            images,
            speech,
            composer,
            AudioProbe::new(config.encoding.ffprobe_bin.clone()),
            pipeline,
        ))
    }
}

#[cfg(test)]
mod tests {
    use storyreel_shared::{ImageProvider, SpeechProvider, StoryReelError, TextProvider};

    use super::*;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.planner.provider = TextProvider::Mock;
        config.image.provider = ImageProvider::Mock;
        config.narration.provider = SpeechProvider::Mock;
        config
    }

    #[test]
    fn offline_config_needs_no_keys() {
        let config = offline_config();
        let controller = StoryReel::from_config(
            &config,
            PipelineConfig::from(&config),
            ComposeSettings::from(&config),
            ServiceKeys::default(),
        );
        assert!(controller.is_ok());
    }

    #[test]
    fn remote_provider_without_key_is_config_error() {
        let mut config = offline_config();
        config.image.provider = ImageProvider::Stability;

        let err = StoryReel::from_config(
            &config,
            PipelineConfig::from(&config),
            ComposeSettings::from(&config),
            ServiceKeys::default(),
        )
        .err()
        .expect("missing key");
        assert!(matches!(err, StoryReelError::Config { .. }));
        assert!(err.to_string().contains("STABILITY_API_KEY"));
    }
}
