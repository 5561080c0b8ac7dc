//! Unified error type for imagefuse.

use std::sync::LazyLock;
use std::time::Duration;

use axum::http::StatusCode;
use regex::Regex;
use thiserror::Error;

use crate::model::ProviderKind;

/// Provider error bodies are cut to this many characters in messages.
pub const MAX_ERROR_BODY_CHARS: usize = 400;

/// Message returned to callers when a provider or source host is unreachable.
const UPSTREAM_UNREACHABLE: &str =
    "Upstream fetch failed (Gemini/Fal). Check local network/proxy/SSL.";

static USER_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)missing|unsupported|too large|invalid").expect("static regex")
});

static NETWORK_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)fetch failed|ENOTFOUND|ECONN|EAI_AGAIN|ETIMEDOUT|dns error|connection refused")
        .expect("static regex")
});

/// Errors that can occur while normalizing inputs or generating images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Input image is neither PNG nor JPEG.
    #[error("Unsupported image type '{mime}'. Use PNG or JPEG.")]
    UnsupportedMediaType {
        /// The detected MIME type.
        mime: String,
    },

    /// Input image exceeds the configured byte ceiling.
    #[error("Image too large: {size} bytes (limit {limit})")]
    PayloadTooLarge {
        /// Actual or declared size in bytes.
        size: u64,
        /// Configured ceiling in bytes.
        limit: u64,
    },

    /// The selected provider has no credential for this request.
    #[error("Missing {provider} API key. Set header {header} or add it via BYOK.")]
    MissingCredential {
        /// Human-readable provider name.
        provider: String,
        /// Request header (or environment variable) that carries the key.
        header: String,
    },

    /// A provider answered with a non-success status.
    #[error("{provider} error {status}: {body}")]
    ProviderError {
        /// Provider name.
        provider: String,
        /// HTTP status code.
        status: u16,
        /// Response body, already truncated.
        body: String,
    },

    /// A Fal job reached a failed state.
    #[error("Fal job {id} failed with status '{status}'")]
    ProviderJobFailed {
        /// Job identifier.
        id: String,
        /// Terminal status reported by the provider.
        status: String,
    },

    /// A Fal job did not settle within the poll window.
    #[error("Fal job {id} timeout after {}s", waited.as_secs())]
    ProviderTimeout {
        /// Job identifier.
        id: String,
        /// How long the job was polled.
        waited: Duration,
    },

    /// The provider reply carried no decodable image.
    #[error("No image in {provider} response")]
    NoImageInResponse {
        /// Provider name.
        provider: String,
    },

    /// A source URL or provider-hosted output answered with a non-success status.
    #[error("Failed to fetch image from {url}: {status}")]
    UpstreamFetch {
        /// The URL that was fetched.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request shape is malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The provider does not offer the requested capability.
    #[error("Unsupported operation: {operation} is not available on {provider}")]
    UnsupportedOperation {
        /// Provider name.
        provider: String,
        /// Operation name.
        operation: &'static str,
    },

    /// The whole request ran past its deadline.
    #[error("Request deadline of {}s exceeded", .0.as_secs())]
    DeadlineExceeded(Duration),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl ImageError {
    /// Build a [`ImageError::ProviderError`] with the body truncated for display.
    #[must_use]
    pub fn provider(provider: ProviderKind, status: u16, body: &str) -> Self {
        Self::ProviderError {
            provider: provider.display_name().to_string(),
            status,
            body: truncate_body(body, MAX_ERROR_BODY_CHARS),
        }
    }

    /// Build a [`ImageError::MissingCredential`] for the given provider.
    #[must_use]
    pub fn missing_credential(provider: ProviderKind) -> Self {
        Self::MissingCredential {
            provider: provider.display_name().to_string(),
            header: provider.credential_header().to_string(),
        }
    }

    /// HTTP status used when this error reaches the server boundary.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType { .. }
            | Self::PayloadTooLarge { .. }
            | Self::MissingCredential { .. }
            | Self::Validation(_)
            | Self::UnsupportedOperation { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamFetch { .. } => StatusCode::BAD_GATEWAY,
            Self::Network(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                StatusCode::BAD_GATEWAY
            }
            Self::ProviderError { .. } | Self::Network(_) => classify_message(&self.to_string()),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller; network failures get a friendlier text.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.status_code() == StatusCode::BAD_GATEWAY && matches!(self, Self::Network(_)) {
            UPSTREAM_UNREACHABLE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// Classify a free-form error message into a response status.
///
/// User-input wording wins over network signatures.
#[must_use]
pub fn classify_message(message: &str) -> StatusCode {
    if USER_ERROR.is_match(message) {
        StatusCode::BAD_REQUEST
    } else if NETWORK_ERROR.is_match(message) {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Truncate `body` to at most `max` characters, marking the cut with an ellipsis.
#[must_use]
pub fn truncate_body(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
