//! The error taxonomy shared across the intake/outbox pipeline.
//!
//! `DomainError` is what validation and normalization produce; `ApiErrorKind`
//! is the stable, small vocabulary the HTTP layer maps every error onto
//! before it ever reaches a client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    /// Honeypot field was non-empty. Intentionally not an `Invalid` variant:
    /// the HTTP layer must answer spam with a silent 202, never a 400.
    #[error("spam")]
    Spam,

    /// A required field was missing or out of range. `reason` is the first
    /// failing check, suitable for inclusion in a 400 response.
    #[error("invalid input: {reason}")]
    Invalid { reason: String },
}

/// The stable, cross-cutting error vocabulary the HTTP layer reports.
///
/// Every handler maps its failures onto one of these before responding;
/// internal error text never crosses the boundary (it's logged instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidInput,
    InvalidJson,
    UnsupportedMediaType,
    Unauthorized,
    RateLimited,
    Spam,
    Internal,
}

impl ApiErrorKind {
    /// The metrics-series label value for `lead_api_lead_submissions_total{result=...}`.
    pub fn submission_result(self) -> &'static str {
        match self {
            ApiErrorKind::InvalidInput => "invalid",
            ApiErrorKind::InvalidJson => "invalid_json",
            ApiErrorKind::UnsupportedMediaType => "invalid",
            ApiErrorKind::Unauthorized => "internal",
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::Spam => "spam",
            ApiErrorKind::Internal => "internal",
        }
    }
}

impl From<&DomainError> for ApiErrorKind {
    fn from(err: &DomainError) -> Self {
        match err {
            DomainError::Spam => ApiErrorKind::Spam,
            DomainError::Invalid { .. } => ApiErrorKind::InvalidInput,
        }
    }
}
