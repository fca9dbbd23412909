//! Error types for platform calls.

use thiserror::Error;

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by a platform call.
#[derive(Error, Debug)]
pub enum Error {
    /// The platform answered with a non-success status.
    #[error("{operation} failed with status {status}: {body}")]
    RequestFailed {
        operation: String,
        status: u16,
        body: String,
    },

    /// The addressed resource does not exist.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// The platform answered with something we cannot interpret.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// Client configuration error.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a request failed error.
    pub fn request_failed(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::RequestFailed {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Whether repeating the call later may succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed { status, .. } => *status >= 500 || *status == 429,
            Self::Http(_) => true,
            _ => false,
        }
    }
}
