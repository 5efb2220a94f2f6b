//! Per-segment asset generation: illustrations and spoken narration.
//!
//! Each adapter wraps an opaque synthesis service behind a trait, writes one
//! file per call with a deterministic name, and reports failures as
//! [`StoryReelError::AssetGeneration`] tagged with the segment index.
//! Neither adapter retries or paces its calls.
//!
//! [`StoryReelError::AssetGeneration`]: storyreel_shared::StoryReelError::AssetGeneration

pub mod audio;
mod error;
mod images;
mod narration;
mod store;

pub use audio::{AudioFormat, AudioProbe, ProbeError, silence_wav, wav_duration_secs};
pub use error::ServiceError;
pub use images::{
    IMAGE_HEIGHT, IMAGE_WIDTH, ImageAdapter, ImageBackend, ImageRequest, ImageService,
    MockImageService, StabilityImageService, StoredImage, solid_png,
};
pub use narration::{
    MockSpeechService, NarrationAdapter, OpenAiSpeechService, SpeechAudio, SpeechBackend,
    SpeechService,
};
