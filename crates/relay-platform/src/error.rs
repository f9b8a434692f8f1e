//! Error types for the platform and chat clients

use thiserror::Error;

/// Result type alias for analytics platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Errors returned by the Tableau Server REST client
#[derive(Error, Debug)]
pub enum PlatformError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Sign-in rejected or session no longer valid
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Request exceeded the configured timeout
    #[error("Request timeout")]
    Timeout,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Timeout
        } else {
            PlatformError::Http(err)
        }
    }
}

impl PlatformError {
    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PlatformError::Api { status, .. } => Some(*status),
            PlatformError::NotFound(_) => Some(404),
            PlatformError::Auth(_) => Some(401),
            _ => None,
        }
    }
}

/// Errors returned by the Slack Web API client
#[derive(Error, Debug)]
pub enum ChatError {
    /// Failed to send request
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Slack answered with `ok: false`
    #[error("Slack API error: {0}")]
    Api(String),

    /// Response body was not the expected JSON
    #[error("Failed to parse response: {error}. Body: {body}")]
    Parse {
        body: String,
        #[source]
        error: serde_json::Error,
    },

    /// Reading the file to upload failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
