//! Failure taxonomy shared by the providers, the synchronizer and the screen.

use serde::Serialize;

/// Coarse classification used for poll state and user notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    NetworkFailure,
    RateLimited,
    MalformedResponse,
    /// A lookup produced zero matches. Never logged as a failure.
    NotFound,
}

/// Errors returned by the external collaborators (bus API, Overpass, geocoder,
/// location service).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    NetworkFailure(String),
    #[error("Rate limited (HTTP 429)")]
    RateLimited,
    #[error("Unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("No position available")]
    PositionUnavailable,
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NetworkFailure(_)
            | ProviderError::UnexpectedStatus(_)
            | ProviderError::PositionUnavailable => ErrorKind::NetworkFailure,
            ProviderError::RateLimited => ErrorKind::RateLimited,
            ProviderError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            ProviderError::PermissionDenied => ErrorKind::PermissionDenied,
        }
    }

    /// Classify a reqwest transport failure. Body decoding errors count as
    /// malformed responses, everything else as network failures.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::NetworkFailure(err.to_string())
        }
    }
}
