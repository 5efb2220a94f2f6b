//! Shared types, error model, and configuration for StoryReel.
//!
//! This crate is the foundation depended on by all other StoryReel crates.
//! It provides:
//! - [`StoryReelError`], the unified error type
//! - Domain types ([`StoryDocument`], [`Segment`], [`RunManifest`], [`RunId`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, EncodingConfig, ImageConfig, ImageProvider, NarrationConfig,
    PipelineConfig, PlannerConfig, RetryConfig, SpeechProvider, TextProvider, TimingConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{AssetKind, Result, StoryReelError};
pub use types::{
    CURRENT_SCHEMA_VERSION, PLANNED_TOTAL_RANGE_SECS, RunId, RunManifest, SEGMENT_COUNT_RANGE,
    Segment, StoryDocument, sanitize_title,
};
