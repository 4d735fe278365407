//! Error types for mask editing and backend job operations

use thiserror::Error;

/// Result type alias for inpainting client operations
pub type Result<T> = std::result::Result<T, InpaintError>;

/// Error taxonomy for the editing session and the backend job client
#[derive(Error, Debug)]
pub enum InpaintError {
    /// A request to the backend failed in a way that may succeed on retry
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// The backend accepted the job but reported it as failed
    #[error("Backend job failed: {0}")]
    BackendJob(String),

    /// The request was rejected before any network call was made
    #[error("Validation error: {0}")]
    Validation(String),

    /// The image payload could not be re-encoded under the size ceiling
    #[error("Compression failed: {0}")]
    Compression(String),

    /// No candidate endpoint answered its health probe
    #[error("Backend unreachable: {0}")]
    ConnectionUnreachable(String),

    /// The poll loop ran out of consecutive-failure budget
    #[error("Gave up polling after {failures} consecutive failures: {last_error}")]
    PollBudgetExhausted { failures: u32, last_error: String },

    /// The session abandoned the job before it resolved
    #[error("Job cancelled")]
    Cancelled,

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Malformed JSON in a backend response or shapes document
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for InpaintError {
    fn from(error: reqwest::Error) -> Self {
        Self::TransientNetwork(error.to_string())
    }
}

impl InpaintError {
    /// Create a new transient network error
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::TransientNetwork(msg.into())
    }

    /// Create a new backend job error
    pub fn backend_job<S: Into<String>>(msg: S) -> Self {
        Self::BackendJob(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new connection unreachable error
    pub fn unreachable<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionUnreachable(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an HTTP status error for a backend path
    pub fn http_status(path: &str, status: reqwest::StatusCode) -> Self {
        Self::TransientNetwork(format!("HTTP {} from {}", status, path))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether the poll loop may retry after this error
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Serialization(_))
    }

    /// Whether this error ends a job for good
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_transient()
    }
}
