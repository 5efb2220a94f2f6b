//! Core domain types for StoryReel runs.

use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the run manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Accepted range for a story's planned total duration, in seconds.
pub const PLANNED_TOTAL_RANGE_SECS: (f64, f64) = (115.0, 125.0);

/// Accepted range for the number of segments in a story.
pub const SEGMENT_COUNT_RANGE: (usize, usize) = (4, 8);

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_\-]").expect("valid regex"));

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StoryDocument / Segment
// ---------------------------------------------------------------------------

/// One narrative unit: text to speak, a prompt to illustrate it, and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Spoken and captioned content.
    pub narration_text: String,
    /// Generation instruction for the image service.
    pub image_prompt: String,
    /// Author-intended pacing, set by the planner.
    pub planned_duration_secs: f64,
    /// Stored image, set during asset generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    /// SHA-256 of the stored image bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    /// Stored narration audio, set during asset generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_audio_path: Option<PathBuf>,
    /// Measured length of the narration audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_narration_duration_secs: Option<f64>,
}

impl Segment {
    /// A freshly planned segment with no assets attached.
    pub fn planned(
        narration_text: impl Into<String>,
        image_prompt: impl Into<String>,
        planned_duration_secs: f64,
    ) -> Self {
        Self {
            narration_text: narration_text.into(),
            image_prompt: image_prompt.into(),
            planned_duration_secs,
            image_path: None,
            image_sha256: None,
            narration_audio_path: None,
            actual_narration_duration_secs: None,
        }
    }

    /// Whether both assets and the measured duration are present.
    pub fn is_complete(&self) -> bool {
        self.image_path.is_some()
            && self.narration_audio_path.is_some()
            && self.actual_narration_duration_secs.is_some()
    }
}

/// The full ordered narrative passed between pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryDocument {
    pub title: String,
    pub segments: Vec<Segment>,
    /// Sum of the segments' planned durations.
    pub planned_total_duration_secs: f64,
}

impl StoryDocument {
    /// Build a document whose planned total is derived from its segments.
    pub fn new(title: impl Into<String>, segments: Vec<Segment>) -> Self {
        let planned_total_duration_secs = segments.iter().map(|s| s.planned_duration_secs).sum();
        Self {
            title: title.into(),
            segments,
            planned_total_duration_secs,
        }
    }

    /// Filesystem-safe stem derived from the title.
    pub fn file_stem(&self) -> String {
        sanitize_title(&self.title)
    }
}

/// Lower-case the title, collapse whitespace runs to `_`, and drop anything
/// outside `[a-z0-9_-]`. An empty result becomes `untitled`.
pub fn sanitize_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let underscored = WHITESPACE_RE.replace_all(&lowered, "_");
    let cleaned = UNSAFE_CHARS_RE.replace_all(&underscored, "");
    if cleaned.is_empty() {
        "untitled".into()
    } else {
        cleaned.into_owned()
    }
}

// ---------------------------------------------------------------------------
// RunManifest
// ---------------------------------------------------------------------------

/// The `<title>.story.json` sidecar written next to a finished video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    pub run_id: RunId,
    /// The idea the run was started from.
    pub idea: String,
    /// Tool version that produced the video.
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Final video path.
    pub video_path: PathBuf,
    /// Rendered duration after crossfade overlap.
    pub rendered_duration_secs: f64,
    pub story: StoryDocument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_time_sortable() {
        let a = RunId::new();
        let b = RunId::new();
        assert!(a.0 <= b.0);
        assert_ne!(a, b);
    }

    #[test]
    fn document_total_is_sum_of_segments() {
        let doc = StoryDocument::new(
            "t",
            vec![Segment::planned("a", "p", 30.0), Segment::planned("b", "q", 90.5)],
        );
        assert!((doc.planned_total_duration_secs - 120.5).abs() < 1e-9);
    }

    #[test]
    fn segment_is_complete_once_assets_and_duration_are_set() {
        let mut seg = Segment::planned("a", "p", 30.0);
        assert!(!seg.is_complete());
        seg.image_path = Some("image_0.png".into());
        seg.narration_audio_path = Some("narration_0.wav".into());
        assert!(!seg.is_complete());
        seg.actual_narration_duration_secs = Some(22.5);
        assert!(seg.is_complete());
    }

    #[test]
    fn sanitize_title_cases() {
        assert_eq!(
            sanitize_title("A Lonely Lighthouse Keeper Befriends a Whale"),
            "a_lonely_lighthouse_keeper_befriends_a_whale"
        );
        assert_eq!(sanitize_title("  Moon/Cat: Part 2!  "), "mooncat_part_2");
        assert_eq!(sanitize_title("tabs\tand  spaces"), "tabs_and_spaces");
        assert_eq!(sanitize_title("???"), "untitled");
    }

    #[test]
    fn segment_serialization_skips_missing_assets() {
        let seg = Segment::planned("hello", "a lighthouse", 24.0);
        let json = serde_json::to_string(&seg).expect("serialize");
        assert!(!json.contains("image_path"));
        assert!(!json.contains("narration_audio_path"));

        let parsed: Segment = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, seg);
    }
}
