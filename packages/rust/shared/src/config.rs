//! Application configuration for StoryReel.
//!
//! User config lives at `~/.storyreel/storyreel.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored here; each service section names the
//! environment variable that holds its key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryReelError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "storyreel.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".storyreel";

// ---------------------------------------------------------------------------
// Config structs (matching storyreel.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Story planning (text generation) service.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Image synthesis service.
    #[serde(default)]
    pub image: ImageConfig,

    /// Speech synthesis service.
    #[serde(default)]
    pub narration: NarrationConfig,

    /// Output encoding parameters.
    #[serde(default)]
    pub encoding: EncodingConfig,

    /// Transition and caption timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Per-stage retry budget.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory receiving images, videos and run manifests.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Whether to burn narration captions into the video.
    #[serde(default = "default_true")]
    pub captions: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            captions: true,
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_true() -> bool {
    true
}

/// Text generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Mock,
}

/// Image synthesis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    Stability,
    Mock,
}

/// Speech synthesis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Mock,
}

/// `[planner]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_text_provider")]
    pub provider: TextProvider,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// Chat-completions endpoint.
    #[serde(default = "default_chat_url")]
    pub api_url: String,

    #[serde(default = "default_planner_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_planner_timeout")]
    pub timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            provider: default_text_provider(),
            api_key_env: default_openai_key_env(),
            api_url: default_chat_url(),
            model: default_planner_model(),
            temperature: default_temperature(),
            timeout_secs: default_planner_timeout(),
        }
    }
}

fn default_text_provider() -> TextProvider {
    TextProvider::OpenAi
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_chat_url() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_planner_model() -> String {
    "gpt-4".into()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_planner_timeout() -> u64 {
    120
}

/// `[image]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_provider")]
    pub provider: ImageProvider,

    #[serde(default = "default_stability_key_env")]
    pub api_key_env: String,

    /// Base URL of the generation API; the engine id is appended.
    #[serde(default = "default_stability_url")]
    pub api_url: String,

    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default = "default_steps")]
    pub steps: u32,

    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,

    /// Maximum image requests in flight at once.
    #[serde(default = "default_image_concurrency")]
    pub concurrency: u32,

    #[serde(default = "default_image_timeout")]
    pub timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            api_key_env: default_stability_key_env(),
            api_url: default_stability_url(),
            engine: default_engine(),
            steps: default_steps(),
            cfg_scale: default_cfg_scale(),
            concurrency: default_image_concurrency(),
            timeout_secs: default_image_timeout(),
        }
    }
}

fn default_image_provider() -> ImageProvider {
    ImageProvider::Stability
}
fn default_stability_key_env() -> String {
    "STABILITY_API_KEY".into()
}
fn default_stability_url() -> String {
    "https://api.stability.ai/v1/generation".into()
}
fn default_engine() -> String {
    "stable-diffusion-v1-6".into()
}
fn default_steps() -> u32 {
    50
}
fn default_cfg_scale() -> f32 {
    7.0
}
fn default_image_concurrency() -> u32 {
    2
}
fn default_image_timeout() -> u64 {
    180
}

/// `[narration]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationConfig {
    #[serde(default = "default_speech_provider")]
    pub provider: SpeechProvider,

    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_speech_url")]
    pub api_url: String,

    #[serde(default = "default_speech_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    /// Minimum ms between two narration requests.
    #[serde(default = "default_min_call_spacing")]
    pub min_call_spacing_ms: u64,

    #[serde(default = "default_speech_timeout")]
    pub timeout_secs: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            provider: default_speech_provider(),
            api_key_env: default_openai_key_env(),
            api_url: default_speech_url(),
            model: default_speech_model(),
            voice: default_voice(),
            min_call_spacing_ms: default_min_call_spacing(),
            timeout_secs: default_speech_timeout(),
        }
    }
}

fn default_speech_provider() -> SpeechProvider {
    SpeechProvider::OpenAi
}
fn default_speech_url() -> String {
    "https://api.openai.com/v1/audio/speech".into()
}
fn default_speech_model() -> String {
    "tts-1".into()
}
fn default_voice() -> String {
    "alloy".into()
}
fn default_min_call_spacing() -> u64 {
    500
}
fn default_speech_timeout() -> u64 {
    60
}

/// `[encoding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Path or name of the `ffmpeg` binary.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_bin: String,
    /// Path or name of the `ffprobe` binary.
    #[serde(default = "default_ffprobe")]
    pub ffprobe_bin: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            preset: default_preset(),
            threads: default_threads(),
            ffmpeg_bin: default_ffmpeg(),
            ffprobe_bin: default_ffprobe(),
        }
    }
}

fn default_fps() -> u32 {
    24
}
fn default_width() -> u32 {
    768
}
fn default_height() -> u32 {
    432
}
fn default_video_codec() -> String {
    "libx264".into()
}
fn default_audio_codec() -> String {
    "aac".into()
}
fn default_video_bitrate() -> String {
    "8000k".into()
}
fn default_audio_bitrate() -> String {
    "384k".into()
}
fn default_preset() -> String {
    "medium".into()
}
fn default_threads() -> u32 {
    4
}
fn default_ffmpeg() -> String {
    "ffmpeg".into()
}
fn default_ffprobe() -> String {
    "ffprobe".into()
}

/// `[timing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Overlap between adjacent clips, in seconds.
    #[serde(default = "default_crossfade")]
    pub crossfade_secs: f64,
    /// Narration fade-in/out length, in seconds.
    #[serde(default = "default_audio_fade")]
    pub audio_fade_secs: f64,
    /// Maximum caption line length, in characters.
    #[serde(default = "default_wrap_width")]
    pub caption_wrap_width: usize,
    #[serde(default = "default_font_size")]
    pub caption_font_size: u32,
    /// Optional TTF/OTF file for captions; ffmpeg's default font otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_font_file: Option<String>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            crossfade_secs: default_crossfade(),
            audio_fade_secs: default_audio_fade(),
            caption_wrap_width: default_wrap_width(),
            caption_font_size: default_font_size(),
            caption_font_file: None,
        }
    }
}

fn default_crossfade() -> f64 {
    0.5
}
fn default_audio_fade() -> f64 {
    0.3
}
fn default_wrap_width() -> usize {
    50
}
fn default_font_size() -> u32 {
    24
}

/// `[retry]` section. Counts are extra attempts after the first failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub planning: u32,
    #[serde(default)]
    pub image: u32,
    #[serde(default)]
    pub narration: u32,
    /// Fixed delay between attempts.
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

fn default_backoff() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime controller configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base directory for images, the video and its manifest.
    pub output_dir: PathBuf,
    /// Maximum concurrent image requests.
    pub image_concurrency: usize,
    /// Minimum spacing between narration requests.
    pub narration_spacing: Duration,
    pub planning_retries: u32,
    pub image_retries: u32,
    pub narration_retries: u32,
    pub retry_backoff: Duration,
}

impl PipelineConfig {
    /// Directory where segment images are stored.
    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join("images")
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.defaults.output_dir),
            image_concurrency: config.image.concurrency.max(1) as usize,
            narration_spacing: Duration::from_millis(config.narration.min_call_spacing_ms),
            planning_retries: config.retry.planning,
            image_retries: config.retry.image,
            narration_retries: config.retry.narration,
            retry_backoff: Duration::from_millis(config.retry.backoff_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.storyreel/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StoryReelError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.storyreel/storyreel.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StoryReelError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| StoryReelError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StoryReelError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StoryReelError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StoryReelError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API key from the env var named `var_name`.
///
/// Called once at startup; the key is then handed to the service client
/// constructor explicitly.
pub fn resolve_api_key(var_name: &str, service: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(StoryReelError::config(format!(
            "{service} API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("STABILITY_API_KEY"));
        assert!(toml_str.contains("provider = \"openai\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.planner.model, "gpt-4");
        assert_eq!(parsed.image.steps, 50);
        assert_eq!(parsed.encoding.fps, 24);
        assert_eq!(parsed.encoding.video_bitrate, "8000k");
        assert_eq!(parsed.timing.caption_wrap_width, 50);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
output_dir = "/tmp/reels"
captions = false

[image]
provider = "mock"
concurrency = 3

[timing]
crossfade_secs = 1.0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.output_dir, "/tmp/reels");
        assert!(!config.defaults.captions);
        assert_eq!(config.image.provider, ImageProvider::Mock);
        assert_eq!(config.image.concurrency, 3);
        assert_eq!(config.image.cfg_scale, 7.0);
        assert_eq!(config.narration.provider, SpeechProvider::OpenAi);
        assert_eq!(config.timing.crossfade_secs, 1.0);
        assert_eq!(config.timing.audio_fade_secs, 0.3);
        assert_eq!(config.retry.narration, 0);
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let app = AppConfig::default();
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.image_concurrency, 2);
        assert_eq!(pipeline.narration_spacing, Duration::from_millis(500));
        assert_eq!(pipeline.images_dir(), PathBuf::from("output").join("images"));
        assert_eq!(pipeline.narration_retries, 0);
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        let mut app = AppConfig::default();
        app.image.concurrency = 0;
        assert_eq!(PipelineConfig::from(&app).image_concurrency, 1);
    }

    #[test]
    fn missing_api_key_is_reported() {
        // Use a unique env var name to avoid interfering with other tests
        let result = resolve_api_key("SR_TEST_NONEXISTENT_KEY_12345", "Stability");
        let err = result.expect_err("key should be missing");
        assert!(err.to_string().contains("SR_TEST_NONEXISTENT_KEY_12345"));
        assert_eq!(err.kind(), "config");
    }
}
