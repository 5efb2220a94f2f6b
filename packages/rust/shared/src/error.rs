//! Error types for StoryReel.
//!
//! Library crates use [`StoryReelError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Which per-segment asset an [`StoryReelError::AssetGeneration`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Narration,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Narration => f.write_str("narration"),
        }
    }
}

/// Top-level error type for all StoryReel operations.
#[derive(Debug, thiserror::Error)]
pub enum StoryReelError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The narrative could not be planned: service unreachable, malformed
    /// response, or a story outside the accepted constraints.
    #[error("planning error: {message}")]
    Planning { message: String },

    /// Image or narration synthesis failed for one segment.
    #[error("{asset} generation failed for segment {segment}: {message}")]
    AssetGeneration {
        segment: usize,
        asset: AssetKind,
        message: String,
    },

    /// A segment reached composition without its assets.
    #[error("segment {segment} is missing {missing} at composition")]
    CompositionPrecondition {
        segment: usize,
        missing: &'static str,
    },

    /// Encoding or muxing failed.
    #[error("composition error: {0}")]
    Composition(String),

    /// The run was cancelled before it could complete.
    #[error("run cancelled")]
    Cancelled,

    /// The controller attempted a state change its state machine forbids.
    #[error("invalid run state transition {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StoryReelError>;

impl StoryReelError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a planning error from any displayable message.
    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning {
            message: msg.into(),
        }
    }

    /// Create an image generation error for `segment`.
    pub fn image(segment: usize, msg: impl Into<String>) -> Self {
        Self::AssetGeneration {
            segment,
            asset: AssetKind::Image,
            message: msg.into(),
        }
    }

    /// Create a narration generation error for `segment`.
    pub fn narration(segment: usize, msg: impl Into<String>) -> Self {
        Self::AssetGeneration {
            segment,
            asset: AssetKind::Narration,
            message: msg.into(),
        }
    }

    /// Create a composition error from any displayable message.
    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable label for the error kind, used in user-facing failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Planning { .. } => "planning",
            Self::AssetGeneration { .. } => "asset_generation",
            Self::CompositionPrecondition { .. } => "composition_precondition",
            Self::Composition(_) => "composition",
            Self::Cancelled => "cancelled",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Io { .. } => "io",
        }
    }
}
