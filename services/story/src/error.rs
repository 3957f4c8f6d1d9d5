//! Error taxonomy for the generation pipeline.
//!
//! Local failures (validation, encoding) resolve to 400 responses. Provider,
//! configuration and storage failures resolve to 500 responses whose body only
//! carries a sanitized message; the full detail stays in the server logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::path::PathBuf;
use thiserror::Error;

/// Why an upload was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    UnsupportedType,
    TooLarge,
    MissingImage,
    EmptyText,
    Malformed,
}

/// Upload or input rejected before any external call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Only {allowed} image files are allowed")]
    UnsupportedType { declared: String, allowed: String },

    #[error("File too large. Max size is {}", format_size(.max_bytes))]
    TooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("No image file provided")]
    MissingImage,

    #[error("Please provide text for audio generation")]
    EmptyText,

    #[error("Error uploading file")]
    Malformed { detail: String },
}

impl ValidationError {
    pub fn reason(&self) -> ValidationReason {
        match self {
            ValidationError::UnsupportedType { .. } => ValidationReason::UnsupportedType,
            ValidationError::TooLarge { .. } => ValidationReason::TooLarge,
            ValidationError::MissingImage => ValidationReason::MissingImage,
            ValidationError::EmptyText => ValidationReason::EmptyText,
            ValidationError::Malformed { .. } => ValidationReason::Malformed,
        }
    }
}

/// The stored file's extension has no data URI MIME tag
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported image format: {extension:?}")]
pub struct UnsupportedFormatError {
    pub extension: String,
}

/// Artifact directory problems
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage directory {path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Normalized failure of an external provider call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Missing provider API key")]
    MissingCredential,

    #[error("Provider rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider service failure: {0}")]
    Service(String),
}

/// Substring rules, checked in order. The providers do not expose structured
/// error codes consistently, so the message text is all there is to go on.
/// Status codes only count in the `HTTP <code>:` prefix the clients add.
const CLASSIFICATION_RULES: &[(&[&str], ProviderErrorKind)] = &[
    (
        &[
            "http 401:",
            "http 403:",
            "unauthorized",
            "invalid api key",
            "invalid_api_key",
            "forbidden",
        ],
        ProviderErrorKind::Unauthorized,
    ),
    (
        &[
            "missing api key",
            "missing groq_api_key",
            "no api key",
            "api key is not set",
            "api_key is not set",
        ],
        ProviderErrorKind::MissingCredential,
    ),
    (
        &["http 429:", "rate limit", "rate_limit", "too many requests", "quota"],
        ProviderErrorKind::RateLimited,
    ),
];

#[derive(Debug, Clone, Copy)]
enum ProviderErrorKind {
    MissingCredential,
    Unauthorized,
    RateLimited,
}

impl ProviderError {
    /// Map a raw provider or transport error message onto the taxonomy
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let haystack = message.to_ascii_lowercase();

        let kind = CLASSIFICATION_RULES
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| haystack.contains(n)))
            .map(|(_, kind)| *kind);

        match kind {
            Some(ProviderErrorKind::MissingCredential) => ProviderError::MissingCredential,
            Some(ProviderErrorKind::Unauthorized) => ProviderError::Unauthorized(message),
            Some(ProviderErrorKind::RateLimited) => ProviderError::RateLimited(message),
            None => ProviderError::Service(message),
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::MissingCredential => "missing_credential",
            ProviderError::Unauthorized(_) => "unauthorized",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Service(_) => "service",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ProviderError::classify(format!("HTTP {}: {}", status.as_u16(), e)),
            None => ProviderError::classify(e.to_string()),
        }
    }
}

/// What went wrong while producing audio
#[derive(Error, Debug)]
pub enum SynthesisFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Audio synthesis failed; the narrated text is kept so it can still be returned
#[derive(Error, Debug)]
#[error("Audio synthesis failed: {cause}")]
pub struct SynthesisError {
    pub story: String,
    #[source]
    pub cause: SynthesisFailure,
}

impl SynthesisError {
    pub fn new(story: impl Into<String>, cause: impl Into<SynthesisFailure>) -> Self {
        Self {
            story: story.into(),
            cause: cause.into(),
        }
    }
}

/// Terminal failure of a pipeline operation
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Provider(ProviderError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ProviderError> for PipelineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::MissingCredential => {
                PipelineError::Configuration("text generation credential is not configured".to_string())
            }
            other => PipelineError::Provider(other),
        }
    }
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) | PipelineError::UnsupportedFormat(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::Configuration(_)
            | PipelineError::Provider(_)
            | PipelineError::Synthesis(_)
            | PipelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Validation(e) => e.to_string(),
            PipelineError::UnsupportedFormat(_) => {
                "Unsupported image format. Please upload a JPG or PNG image".to_string()
            }
            PipelineError::Configuration(_) => {
                "Server configuration error: Missing API key".to_string()
            }
            PipelineError::Provider(_) => {
                "AI service error. Please try again later".to_string()
            }
            PipelineError::Synthesis(_) => "Failed to generate audio".to_string(),
            PipelineError::Storage(_) => "Failed to store uploaded file".to_string(),
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::UnsupportedFormat(_) => "unsupported_format",
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Provider(_) => "provider",
            PipelineError::Synthesis(_) => "synthesis",
            PipelineError::Storage(_) => "storage",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "message": self.user_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Whole megabytes print as `5MB`, anything else in bytes
fn format_size(bytes: &u64) -> String {
    const MB: u64 = 1024 * 1024;
    let bytes = *bytes;
    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_credential() {
        assert_eq!(
            ProviderError::classify("Missing GROQ_API_KEY. Please add it to your .env file"),
            ProviderError::MissingCredential
        );
    }

    #[test]
    fn test_classify_unauthorized() {
        let err = ProviderError::classify("HTTP 401: Invalid API Key");
        assert!(matches!(err, ProviderError::Unauthorized(_)));
        assert_eq!(err.kind(), "unauthorized");
    }

    #[test]
    fn test_classify_rate_limited() {
        let err = ProviderError::classify("HTTP 429: Rate limit reached for model");
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[test]
    fn test_classify_ignores_codes_outside_status_prefix() {
        let err = ProviderError::classify("HTTP 500: request 4031 failed after 401ms");
        assert!(matches!(err, ProviderError::Service(_)));

        let err = ProviderError::classify("HTTP 502: upstream rejected field api_key_id");
        assert!(matches!(err, ProviderError::Service(_)));

        let err = ProviderError::classify("HTTP 403: access denied");
        assert!(matches!(err, ProviderError::Unauthorized(_)));
    }

    #[test]
    fn test_classify_falls_back_to_service() {
        let err = ProviderError::classify("connection reset by peer");
        assert_eq!(err, ProviderError::Service("connection reset by peer".to_string()));
    }

    #[test]
    fn test_missing_credential_becomes_configuration_error() {
        let err: PipelineError = ProviderError::MissingCredential.into();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_status_codes() {
        let validation: PipelineError = ValidationError::MissingImage.into();
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);

        let format: PipelineError = UnsupportedFormatError {
            extension: ".gif".to_string(),
        }
        .into();
        assert_eq!(format.status_code(), StatusCode::BAD_REQUEST);

        let provider: PipelineError = ProviderError::Service("boom".to_string()).into();
        assert_eq!(provider.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_user_message_is_sanitized() {
        let err: PipelineError =
            ProviderError::Unauthorized("HTTP 401: key gsk_secret rejected".to_string()).into();
        assert!(!err.user_message().contains("gsk_secret"));

        let err = PipelineError::Configuration("key gsk_secret".to_string());
        assert!(!err.user_message().contains("gsk_secret"));
    }

    #[test]
    fn test_too_large_message() {
        let err = ValidationError::TooLarge {
            size_bytes: 6 * 1024 * 1024,
            max_bytes: 5 * 1024 * 1024,
        };
        assert_eq!(err.to_string(), "File too large. Max size is 5MB");
        assert_eq!(err.reason(), ValidationReason::TooLarge);
    }
}
