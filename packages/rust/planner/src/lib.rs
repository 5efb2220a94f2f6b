//! Narrative planning: turn a free-text idea into a validated [`StoryDocument`].
//!
//! The planner asks a [`TextGenerationService`] for a story, parses the JSON
//! it returns, and accepts the result only if it passes [`validate_story`].
//! No image or audio work happens here, and nothing is retried.

mod service;
mod story;

use tracing::{info, instrument, warn};

use storyreel_shared::{Result, StoryDocument, StoryReelError};

pub use service::{MockTextService, OpenAiTextService, TextBackend, TextGenerationService};
pub use story::{
    PlanValidation, PlanViolation, RawSegment, RawStory, parse_story_response, validate_story,
};

/// Plans stories with a text generation service.
#[derive(Debug, Clone)]
pub struct NarrativePlanner<T> {
    service: T,
}

impl<T: TextGenerationService> NarrativePlanner<T> {
    pub fn new(service: T) -> Self {
        Self { service }
    }

    /// Generate and validate a story for `idea`.
    ///
    /// Fails with a planning error when the service is unreachable, the
    /// response is malformed, or the story breaks a segment count or
    /// duration constraint.
    #[instrument(skip_all, fields(idea_chars = idea.len()))]
    pub async fn plan(&self, idea: &str) -> Result<StoryDocument> {
        let idea = idea.trim();
        if idea.is_empty() {
            return Err(StoryReelError::planning("idea is empty"));
        }

        let response = self.service.generate_story_json(idea).await?;
        let raw = parse_story_response(&response)?;

        let validation = validate_story(raw);
        if let PlanValidation::Rejected(violations) = &validation {
            warn!(violations = violations.len(), "story rejected");
        }
        let doc = validation.into_result()?;

        info!(
            title = %doc.title,
            segments = doc.segments.len(),
            planned_total_secs = doc.planned_total_duration_secs,
            "story planned"
        );
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_service_yields_valid_story() {
        let planner = NarrativePlanner::new(MockTextService::new());
        let doc = planner
            .plan("a lonely lighthouse keeper befriends a whale")
            .await
            .expect("plan");

        assert_eq!(doc.title, "a lonely lighthouse keeper befriends a whale");
        assert_eq!(doc.segments.len(), 5);
        assert_eq!(doc.planned_total_duration_secs, 120.0);
        assert!(doc.segments.iter().all(|s| !s.image_prompt.is_empty()));
    }

    #[tokio::test]
    async fn out_of_range_story_is_rejected() {
        let response = r#"{"title":"Too Long","chunks":[
            {"text":"a","image_prompt":"a","duration":40},
            {"text":"b","image_prompt":"b","duration":40},
            {"text":"c","image_prompt":"c","duration":40},
            {"text":"d","image_prompt":"d","duration":40}
        ],"total_duration":120}"#;
        let planner = NarrativePlanner::new(MockTextService::with_response(response));

        let err = planner.plan("anything").await.expect_err("should reject");
        assert_eq!(err.kind(), "planning");
        assert!(err.to_string().contains("160.0s"));
    }

    #[tokio::test]
    async fn too_few_segments_are_rejected() {
        let response = r#"{"title":"Short","chunks":[
            {"text":"a","image_prompt":"a","duration":60},
            {"text":"b","image_prompt":"b","duration":60}
        ]}"#;
        let planner = NarrativePlanner::new(MockTextService::with_response(response));

        let err = planner.plan("anything").await.expect_err("should reject");
        assert!(err.to_string().contains("2 segments"));
    }

    #[tokio::test]
    async fn blank_idea_is_rejected_before_generation() {
        let planner = NarrativePlanner::new(MockTextService::with_response("not json"));
        let err = planner.plan("   ").await.expect_err("blank idea");
        assert!(err.to_string().contains("idea is empty"));
    }
}
