//! Narration asset adapter: one spoken audio file per segment, with its
//! measured duration.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use storyreel_shared::{NarrationConfig, Result, SpeechProvider, StoryReelError};

use crate::audio::{AudioFormat, AudioProbe, silence_wav};
use crate::error::{ServiceError, status_error};
use crate::store::write_atomic;

/// User-Agent string for speech requests.
const USER_AGENT: &str = concat!("StoryReel/", env!("CARGO_PKG_VERSION"));

/// Encoded speech returned by a [`SpeechService`].
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// A service that speaks text aloud.
pub trait SpeechService: Send + Sync {
    fn synthesize(
        &self,
        text: &str,
    ) -> impl Future<Output = std::result::Result<SpeechAudio, ServiceError>> + Send;
}

impl<S: SpeechService> SpeechService for &S {
    fn synthesize(
        &self,
        text: &str,
    ) -> impl Future<Output = std::result::Result<SpeechAudio, ServiceError>> + Send {
        (**self).synthesize(text)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible /audio/speech
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

/// Text-to-speech client requesting WAV output.
#[derive(Debug, Clone)]
pub struct OpenAiSpeechService {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl OpenAiSpeechService {
    /// Build a client from the `[narration]` config and an explicit API key.
    pub fn new(
        config: &NarrationConfig,
        api_key: impl Into<String>,
    ) -> std::result::Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: api_key.into(),
            model: config.model.clone(),
            voice: config.voice.clone(),
        })
    }
}

impl SpeechService for OpenAiSpeechService {
    async fn synthesize(&self, text: &str) -> std::result::Result<SpeechAudio, ServiceError> {
        let body = SpeechBody {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "wav",
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let bytes = response.bytes().await?.to_vec();
        let format = AudioFormat::sniff(&bytes).unwrap_or(AudioFormat::Wav);
        Ok(SpeechAudio { bytes, format })
    }
}

// ---------------------------------------------------------------------------
// Offline mock
// ---------------------------------------------------------------------------

/// Offline service producing silent WAV audio paced by word count.
#[derive(Debug, Clone)]
pub struct MockSpeechService {
    words_per_second: f64,
    sample_rate: u32,
}

impl Default for MockSpeechService {
    fn default() -> Self {
        Self {
            words_per_second: 2.5,
            sample_rate: 8_000,
        }
    }
}

impl MockSpeechService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the audio produced for `text`; never shorter than one second.
    pub fn duration_for(&self, text: &str) -> f64 {
        let words = text.split_whitespace().count() as f64;
        (words / self.words_per_second).max(1.0)
    }
}

impl SpeechService for MockSpeechService {
    async fn synthesize(&self, text: &str) -> std::result::Result<SpeechAudio, ServiceError> {
        let bytes = silence_wav(self.duration_for(text), self.sample_rate)
            .map_err(|e| ServiceError::Payload(format!("cannot encode silence: {e}")))?;
        Ok(SpeechAudio {
            bytes,
            format: AudioFormat::Wav,
        })
    }
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Speech service chosen at startup from `[narration].provider`.
#[derive(Debug, Clone)]
pub enum SpeechBackend {
    OpenAi(OpenAiSpeechService),
    Mock(MockSpeechService),
}

impl SpeechBackend {
    /// Build the configured backend. Remote providers require `api_key`.
    pub fn from_config(config: &NarrationConfig, api_key: Option<String>) -> Result<Self> {
        match config.provider {
            SpeechProvider::Mock => Ok(Self::Mock(MockSpeechService::new())),
            SpeechProvider::OpenAi => {
                let key = api_key.ok_or_else(|| {
                    StoryReelError::config(format!(
                        "narration API key missing; set {}",
                        config.api_key_env
                    ))
                })?;
                let service = OpenAiSpeechService::new(config, key)
                    .map_err(|e| StoryReelError::config(e.to_string()))?;
                Ok(Self::OpenAi(service))
            }
        }
    }
}

impl SpeechService for SpeechBackend {
    async fn synthesize(&self, text: &str) -> std::result::Result<SpeechAudio, ServiceError> {
        match self {
            Self::OpenAi(service) => service.synthesize(text).await,
            Self::Mock(service) => service.synthesize(text).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Resolves segment text to `narration_<index>.<ext>` files and measures
/// their duration from the produced audio.
///
/// Call spacing is the caller's concern.
#[derive(Debug, Clone)]
pub struct NarrationAdapter<S> {
    service: S,
    audio_dir: PathBuf,
    probe: AudioProbe,
}

impl<S: SpeechService> NarrationAdapter<S> {
    pub fn new(service: S, audio_dir: impl Into<PathBuf>, probe: AudioProbe) -> Self {
        Self {
            service,
            audio_dir: audio_dir.into(),
            probe,
        }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Synthesize narration for segment `index`, returning the stored file
    /// and its measured duration in seconds.
    #[instrument(skip_all, fields(segment = index))]
    pub async fn synthesize_narration(&self, text: &str, index: usize) -> Result<(PathBuf, f64)> {
        if text.trim().is_empty() {
            return Err(StoryReelError::narration(index, "narration text is empty"));
        }

        let audio = self
            .service
            .synthesize(text)
            .await
            .map_err(|e| StoryReelError::narration(index, e.to_string()))?;

        if audio.bytes.is_empty() {
            return Err(StoryReelError::narration(index, "service returned empty audio"));
        }

        let path = self
            .audio_dir
            .join(format!("narration_{index}.{}", audio.format.extension()));
        write_atomic(&path, &audio.bytes)
            .await
            .map_err(|e| StoryReelError::narration(index, format!("cannot store audio: {e}")))?;

        let duration = self
            .probe
            .duration_secs(&path, &audio.bytes)
            .await
            .map_err(|e| StoryReelError::narration(index, format!("cannot measure audio: {e}")))?;

        if !duration.is_finite() || duration <= 0.0 {
            return Err(StoryReelError::narration(
                index,
                format!("audio has no duration ({duration})"),
            ));
        }

        info!(?path, duration_secs = duration, "narration stored");
        Ok((path, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("storyreel_narration_test_{}", uuid::Uuid::now_v7()))
    }

    fn speech_config(server: &MockServer) -> NarrationConfig {
        NarrationConfig {
            api_url: format!("{}/v1/audio/speech", server.uri()),
            timeout_secs: 5,
            ..NarrationConfig::default()
        }
    }

    #[tokio::test]
    async fn measures_duration_of_service_audio() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(header("authorization", "Bearer sk-tts"))
            .and(body_partial_json(serde_json::json!({
                "model": "tts-1",
                "voice": "alloy",
                "input": "The keeper waved.",
                "response_format": "wav",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(silence_wav(3.0, 16_000).expect("encode")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = temp_dir();
        let service = OpenAiSpeechService::new(&speech_config(&server), "sk-tts").expect("client");
        let adapter = NarrationAdapter::new(service, &dir, AudioProbe::new("ffprobe"));

        let (path, duration) = adapter
            .synthesize_narration("The keeper waved.", 4)
            .await
            .expect("narration");

        assert_eq!(path, dir.join("narration_4.wav"));
        assert!(path.exists());
        assert!((duration - 3.0).abs() < 1e-3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn service_error_is_narration_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let dir = temp_dir();
        let service = OpenAiSpeechService::new(&speech_config(&server), "k").expect("client");
        let adapter = NarrationAdapter::new(service, &dir, AudioProbe::new("ffprobe"));

        let err = adapter
            .synthesize_narration("hello", 2)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            StoryReelError::AssetGeneration { segment: 2, asset: storyreel_shared::AssetKind::Narration, .. }
        ));
        assert!(err.to_string().contains("429"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_audio_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = temp_dir();
        let service = OpenAiSpeechService::new(&speech_config(&server), "k").expect("client");
        let adapter = NarrationAdapter::new(service, &dir, AudioProbe::new("ffprobe"));

        let err = adapter
            .synthesize_narration("hello", 0)
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("empty audio"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn zero_length_wav_is_rejected() {
        struct Silent;
        impl SpeechService for Silent {
            async fn synthesize(&self, _text: &str) -> std::result::Result<SpeechAudio, ServiceError> {
                Ok(SpeechAudio {
                    bytes: silence_wav(0.0, 8_000).expect("encode"),
                    format: AudioFormat::Wav,
                })
            }
        }

        let dir = temp_dir();
        let adapter = NarrationAdapter::new(Silent, &dir, AudioProbe::new("ffprobe"));
        let err = adapter
            .synthesize_narration("hello", 1)
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("no duration"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn mock_duration_tracks_word_count() {
        let dir = temp_dir();
        let adapter = NarrationAdapter::new(MockSpeechService::new(), &dir, AudioProbe::new("ffprobe"));

        let text = "one two three four five six seven eight nine ten";
        let (_, duration) = adapter.synthesize_narration(text, 0).await.expect("narration");
        assert!((duration - 4.0).abs() < 1e-3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unwritable_audio_dir_is_asset_error() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("mkdir");
        let blocker = dir.join("audio");
        std::fs::write(&blocker, b"not a directory").expect("write");
        let adapter =
            NarrationAdapter::new(MockSpeechService::new(), &blocker, AudioProbe::new("ffprobe"));

        let err = adapter
            .synthesize_narration("hello there", 2)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            StoryReelError::AssetGeneration {
                segment: 2,
                asset: storyreel_shared::AssetKind::Narration,
                ..
            }
        ));
        assert!(err.to_string().contains("cannot store audio"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
