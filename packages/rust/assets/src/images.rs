//! Image asset adapter: one stored PNG per segment prompt.

use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

use storyreel_shared::{ImageConfig, ImageProvider, Result, StoryReelError};

use crate::error::{ServiceError, status_error};
use crate::store::{sha256_hex, write_atomic};

/// Output size requested from the image service.
pub const IMAGE_WIDTH: u32 = 768;
pub const IMAGE_HEIGHT: u32 = 432;

/// User-Agent string for image requests.
const USER_AGENT: &str = concat!("StoryReel/", env!("CARGO_PKG_VERSION"));

/// Fixed parameters of a single text-to-image request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
        }
    }
}

/// A service that renders a prompt to encoded image bytes.
pub trait ImageService: Send + Sync {
    fn synthesize(
        &self,
        request: &ImageRequest,
    ) -> impl Future<Output = std::result::Result<Vec<u8>, ServiceError>> + Send;
}

// ---------------------------------------------------------------------------
// Stability REST v1
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TextToImageBody<'a> {
    text_prompts: [TextPrompt<'a>; 1],
    cfg_scale: f32,
    width: u32,
    height: u32,
    samples: u32,
    steps: u32,
    sampler: &'static str,
}

#[derive(Debug, Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
    weight: f32,
}

/// Stability text-to-image client returning PNG bytes.
#[derive(Debug, Clone)]
pub struct StabilityImageService {
    client: Client,
    endpoint: String,
    api_key: String,
    steps: u32,
    cfg_scale: f32,
}

impl StabilityImageService {
    /// Build a client from the `[image]` config and an explicit API key.
    pub fn new(
        config: &ImageConfig,
        api_key: impl Into<String>,
    ) -> std::result::Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}/text-to-image",
                config.api_url.trim_end_matches('/'),
                config.engine
            ),
            api_key: api_key.into(),
            steps: config.steps,
            cfg_scale: config.cfg_scale,
        })
    }
}

impl ImageService for StabilityImageService {
    async fn synthesize(&self, request: &ImageRequest) -> std::result::Result<Vec<u8>, ServiceError> {
        let body = TextToImageBody {
            text_prompts: [TextPrompt {
                text: &request.prompt,
                weight: 1.0,
            }],
            cfg_scale: self.cfg_scale,
            width: request.width,
            height: request.height,
            samples: 1,
            steps: self.steps,
            sampler: "K_DPMPP_2M",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "image/png")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(response.bytes().await?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Offline mock
// ---------------------------------------------------------------------------

/// Offline service producing a solid-colour PNG derived from the prompt.
#[derive(Debug, Clone, Default)]
pub struct MockImageService;

impl ImageService for MockImageService {
    async fn synthesize(&self, request: &ImageRequest) -> std::result::Result<Vec<u8>, ServiceError> {
        solid_png(&request.prompt, request.width, request.height)
    }
}

/// Encode a single-colour PNG whose colour is hashed from `seed`.
pub fn solid_png(seed: &str, width: u32, height: u32) -> std::result::Result<Vec<u8>, ServiceError> {
    let hash = seed
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    let [_, r, g, b] = hash.to_be_bytes();

    let img = image::RgbImage::from_pixel(width, height, image::Rgb([r, g, b]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| ServiceError::Payload(format!("failed to encode PNG: {e}")))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Image service chosen at startup from `[image].provider`.
#[derive(Debug, Clone)]
pub enum ImageBackend {
    Stability(StabilityImageService),
    Mock(MockImageService),
}

impl ImageBackend {
    /// Build the configured backend. Remote providers require `api_key`.
    pub fn from_config(config: &ImageConfig, api_key: Option<String>) -> Result<Self> {
        match config.provider {
            ImageProvider::Mock => Ok(Self::Mock(MockImageService)),
            ImageProvider::Stability => {
                let key = api_key.ok_or_else(|| {
                    StoryReelError::config(format!(
                        "image API key missing; set {}",
                        config.api_key_env
                    ))
                })?;
                let service = StabilityImageService::new(config, key)
                    .map_err(|e| StoryReelError::config(e.to_string()))?;
                Ok(Self::Stability(service))
            }
        }
    }
}

impl ImageService for ImageBackend {
    async fn synthesize(&self, request: &ImageRequest) -> std::result::Result<Vec<u8>, ServiceError> {
        match self {
            Self::Stability(service) => service.synthesize(request).await,
            Self::Mock(service) => service.synthesize(request).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// An image written to disk for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub sha256: String,
}

/// Resolves segment prompts to `image_<index>.png` files.
///
/// Makes exactly one service call and writes exactly one file per
/// [`resolve_image`](Self::resolve_image). Retrying is the caller's decision.
#[derive(Debug, Clone)]
pub struct ImageAdapter<S> {
    service: S,
    images_dir: PathBuf,
}

impl<S: ImageService> ImageAdapter<S> {
    pub fn new(service: S, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            images_dir: images_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Deterministic output path for segment `index`.
    pub fn image_path(&self, index: usize) -> PathBuf {
        self.images_dir.join(format!("image_{index}.png"))
    }

    /// Generate and store the image for segment `index`.
    #[instrument(skip_all, fields(segment = index))]
    pub async fn resolve_image(&self, prompt: &str, index: usize) -> Result<StoredImage> {
        let request = ImageRequest::new(prompt);
        let bytes = self
            .service
            .synthesize(&request)
            .await
            .map_err(|e| StoryReelError::image(index, e.to_string()))?;

        if bytes.is_empty() {
            return Err(StoryReelError::image(index, "service returned an empty image"));
        }

        let (width, height) = image_dimensions(&bytes)
            .map_err(|e| StoryReelError::image(index, format!("undecodable image: {e}")))?;
        if (width, height) != (request.width, request.height) {
            warn!(
                width,
                height,
                expected_width = request.width,
                expected_height = request.height,
                "image size differs from request"
            );
        }

        let path = self.image_path(index);
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| StoryReelError::image(index, format!("cannot store image: {e}")))?;
        let sha256 = sha256_hex(&bytes);

        info!(?path, bytes = bytes.len(), "image stored");
        Ok(StoredImage { path, sha256 })
    }
}

/// Read the dimensions from an encoded image header.
fn image_dimensions(bytes: &[u8]) -> std::result::Result<(u32, u32), image::ImageError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_dimensions()
}
