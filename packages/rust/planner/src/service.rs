//! Text generation services that produce story JSON from an idea.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use storyreel_shared::{PlannerConfig, Result, StoryReelError, TextProvider};

/// User-Agent string for text generation requests.
const USER_AGENT: &str = concat!("StoryReel/", env!("CARGO_PKG_VERSION"));

/// Response bodies longer than this are cut in error messages.
const ERROR_BODY_PREVIEW: usize = 300;

const SYSTEM_PROMPT: &str = "You are a creative story generator that creates engaging, \
whimsical 2-minute stories. For each story:
1. Create a compelling narrative that can be told in 2 minutes
2. Split the story into 4-8 chunks, each with accompanying image prompts
3. Each chunk should be timed to fit within the 2-minute constraint
4. Image prompts should be detailed and creative, focusing on key story elements
5. Ensure the story flows naturally between chunks";

const FORMAT_INSTRUCTIONS: &str = "Respond with a single JSON object and nothing else, \
using this structure:
{\"title\": string, \"chunks\": [{\"text\": string, \"image_prompt\": string, \
\"duration\": number (seconds)}], \"total_duration\": number (seconds, between 115 and 125)}";

/// A service that turns an idea into an unvalidated story JSON string.
pub trait TextGenerationService: Send + Sync {
    fn generate_story_json(&self, idea: &str) -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: std::borrow::Cow<'a, str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for story planning.
#[derive(Debug, Clone)]
pub struct OpenAiTextService {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiTextService {
    /// Build a client from the `[planner]` config and an explicit API key.
    pub fn new(config: &PlannerConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoryReelError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

impl TextGenerationService for OpenAiTextService {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate_story_json(&self, idea: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Create a 2-minute story based on this idea: {idea}").into(),
                },
                ChatMessage {
                    role: "system",
                    content: FORMAT_INSTRUCTIONS.into(),
                },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| StoryReelError::planning(format!("text service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoryReelError::planning(format!(
                "text service returned HTTP {status}: {}",
                preview(&body)
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            StoryReelError::planning(format!("malformed text service response: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StoryReelError::planning("text service returned no content"))?;

        debug!(chars = content.len(), "story response received");
        Ok(content)
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// ---------------------------------------------------------------------------
// Offline mock
// ---------------------------------------------------------------------------

/// Offline service returning a fixed five-part, 120-second story built
/// around the idea, or a canned response when one is supplied.
#[derive(Debug, Clone, Default)]
pub struct MockTextService {
    canned: Option<String>,
}

impl MockTextService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `response`, verbatim.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            canned: Some(response.into()),
        }
    }
}

impl TextGenerationService for MockTextService {
    async fn generate_story_json(&self, idea: &str) -> Result<String> {
        if let Some(canned) = &self.canned {
            return Ok(canned.clone());
        }

        let beats = [
            ("Once upon a time", 22.0),
            ("One day, something unexpected happened", 24.0),
            ("Together they faced the storm", 24.0),
            ("At last, the skies cleared", 25.0),
            ("And from then on, nothing was ever the same", 25.0),
        ];
        let chunks: Vec<serde_json::Value> = beats
            .iter()
            .enumerate()
            .map(|(i, (opening, duration))| {
                serde_json::json!({
                    "text": format!("{opening}: {idea}."),
                    "image_prompt": format!("Whimsical storybook illustration, scene {}: {idea}", i + 1),
                    "duration": duration,
                })
            })
            .collect();

        Ok(serde_json::json!({
            "title": idea,
            "chunks": chunks,
            "total_duration": 120.0,
        })
        .to_string())
    }
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Text service chosen at startup from `[planner].provider`.
#[derive(Debug, Clone)]
pub enum TextBackend {
    OpenAi(OpenAiTextService),
    Mock(MockTextService),
}

impl TextBackend {
    /// Build the configured backend. Remote providers require `api_key`.
    pub fn from_config(config: &PlannerConfig, api_key: Option<String>) -> Result<Self> {
        match config.provider {
            TextProvider::Mock => Ok(Self::Mock(MockTextService::new())),
            TextProvider::OpenAi => {
                let key = api_key.ok_or_else(|| {
                    StoryReelError::config(format!(
                        "planner API key missing; set {}",
                        config.api_key_env
                    ))
                })?;
                Ok(Self::OpenAi(OpenAiTextService::new(config, key)?))
            }
        }
    }
}

impl TextGenerationService for TextBackend {
    async fn generate_story_json(&self, idea: &str) -> Result<String> {
        match self {
            Self::OpenAi(service) => service.generate_story_json(idea).await,
            Self::Mock(service) => service.generate_story_json(idea).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> PlannerConfig {
        PlannerConfig {
            api_url: format!("{}/v1/chat/completions", server.uri()),
            timeout_secs: 5,
            ..PlannerConfig::default()
        }
    }

    #[tokio::test]
    async fn openai_service_sends_prompt_and_returns_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4",
                "temperature": 0.8,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"title\":\"T\"}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = OpenAiTextService::new(&config_for(&server), "sk-test").expect("client");
        let content = service
            .generate_story_json("a whale")
            .await
            .expect("generate");
        assert_eq!(content, "{\"title\":\"T\"}");
    }

    #[tokio::test]
    async fn http_error_is_planning_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let service = OpenAiTextService::new(&config_for(&server), "sk-test").expect("client");
        let err = service
            .generate_story_json("a whale")
            .await
            .expect_err("should fail");
        assert_eq!(err.kind(), "planning");
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn empty_choices_is_planning_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let service = OpenAiTextService::new(&config_for(&server), "sk-test").expect("client");
        let err = service
            .generate_story_json("a whale")
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("no content"));
    }

    #[test]
    fn remote_backend_requires_key() {
        let err = TextBackend::from_config(&PlannerConfig::default(), None)
            .expect_err("key required");
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(preview(&body).len(), ERROR_BODY_PREVIEW);
        assert_eq!(preview("short"), "short");
    }
}
