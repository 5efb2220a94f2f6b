//! Parsing and validation of story documents returned by the text service.
//!
//! Parsing only checks shape. Every constraint on content and timing is
//! checked by [`validate_story`], which reports all violations at once.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use storyreel_shared::{
    PLANNED_TOTAL_RANGE_SECS, Result, SEGMENT_COUNT_RANGE, Segment, StoryDocument, StoryReelError,
};

/// A reported total further than this from the segment sum is logged.
const TOTAL_MISMATCH_TOLERANCE_SECS: f64 = 1.0;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid regex"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Story as emitted by the text service, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStory {
    #[serde(default)]
    pub title: String,
    #[serde(alias = "segments")]
    pub chunks: Vec<RawSegment>,
    /// Total the service claims; informational only.
    #[serde(default, alias = "planned_total_duration_secs")]
    pub total_duration: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSegment {
    #[serde(alias = "narration_text")]
    pub text: String,
    pub image_prompt: String,
    #[serde(alias = "planned_duration_secs")]
    pub duration: f64,
}

/// Extract the JSON object from a model response and deserialize it.
///
/// Tolerates Markdown code fences and prose around the object.
pub fn parse_story_response(response: &str) -> Result<RawStory> {
    let body = match FENCE_RE.captures(response).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => response.trim(),
    };

    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(StoryReelError::planning(
                "text service response contains no JSON object",
            ));
        }
    };

    serde_json::from_str(json)
        .map_err(|e| StoryReelError::planning(format!("malformed story JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single reason a story was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanViolation {
    EmptyTitle,
    SegmentCount { count: usize },
    BlankNarration { segment: usize },
    BlankImagePrompt { segment: usize },
    InvalidDuration { segment: usize, value: f64 },
    TotalOutOfRange { total: f64 },
}

impl std::fmt::Display for PlanViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (min_count, max_count) = SEGMENT_COUNT_RANGE;
        let (min_total, max_total) = PLANNED_TOTAL_RANGE_SECS;
        match self {
            Self::EmptyTitle => f.write_str("story has no title"),
            Self::SegmentCount { count } => write!(
                f,
                "story has {count} segments, expected {min_count}..={max_count}"
            ),
            Self::BlankNarration { segment } => write!(f, "segment {segment} has no text"),
            Self::BlankImagePrompt { segment } => {
                write!(f, "segment {segment} has no image prompt")
            }
            Self::InvalidDuration { segment, value } => {
                write!(f, "segment {segment} has invalid duration {value}")
            }
            Self::TotalOutOfRange { total } => write!(
                f,
                "total duration {total:.1}s outside {min_total}..={max_total}s"
            ),
        }
    }
}

/// Outcome of [`validate_story`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlanValidation {
    Accepted(StoryDocument),
    Rejected(Vec<PlanViolation>),
}

impl PlanValidation {
    /// Convert into a `Result`, joining violations into one planning error.
    pub fn into_result(self) -> Result<StoryDocument> {
        match self {
            Self::Accepted(doc) => Ok(doc),
            Self::Rejected(violations) => {
                let reasons: Vec<String> = violations.iter().map(ToString::to_string).collect();
                Err(StoryReelError::planning(format!(
                    "story rejected: {}",
                    reasons.join("; ")
                )))
            }
        }
    }
}

/// Check a raw story against the segment count, content and duration
/// constraints. Out-of-range durations are rejected, never adjusted.
pub fn validate_story(raw: RawStory) -> PlanValidation {
    let mut violations = Vec::new();

    if raw.title.trim().is_empty() {
        violations.push(PlanViolation::EmptyTitle);
    }

    let (min_count, max_count) = SEGMENT_COUNT_RANGE;
    let count = raw.chunks.len();
    if !(min_count..=max_count).contains(&count) {
        violations.push(PlanViolation::SegmentCount { count });
    }

    for (segment, chunk) in raw.chunks.iter().enumerate() {
        if chunk.text.trim().is_empty() {
            violations.push(PlanViolation::BlankNarration { segment });
        }
        if chunk.image_prompt.trim().is_empty() {
            violations.push(PlanViolation::BlankImagePrompt { segment });
        }
        if !chunk.duration.is_finite() || chunk.duration <= 0.0 {
            violations.push(PlanViolation::InvalidDuration {
                segment,
                value: chunk.duration,
            });
        }
    }

    let total: f64 = raw.chunks.iter().map(|c| c.duration).sum();
    let (min_total, max_total) = PLANNED_TOTAL_RANGE_SECS;
    if !(min_total..=max_total).contains(&total) {
        violations.push(PlanViolation::TotalOutOfRange { total });
    }

    if let Some(reported) = raw.total_duration {
        if (reported - total).abs() > TOTAL_MISMATCH_TOLERANCE_SECS {
            warn!(reported, computed = total, "reported total disagrees with segment sum");
        }
    }

    if !violations.is_empty() {
        return PlanValidation::Rejected(violations);
    }

    let segments = raw
        .chunks
        .into_iter()
        .map(|c| Segment::planned(c.text.trim(), c.image_prompt.trim(), c.duration))
        .collect();

    PlanValidation::Accepted(StoryDocument::new(raw.title.trim(), segments))
}
