//! Errors raised by asset service clients.
//!
//! Service clients do not know which segment they are serving; the adapters
//! attach the segment index when converting into [`StoryReelError`].
//!
//! [`StoryReelError`]: storyreel_shared::StoryReelError

/// Failure talking to an image or speech synthesis service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The request never produced a response (connect error, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response arrived but its payload is unusable.
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Client(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Response bodies longer than this are cut in error messages.
const ERROR_BODY_PREVIEW: usize = 300;

/// Build a [`ServiceError::Status`] from a failed response.
pub(crate) async fn status_error(response: reqwest::Response) -> ServiceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = match body.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body,
    };
    ServiceError::Status { status, body }
}
