use storyreel_core::error::CoreError;

/// Errors from a generative backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected backend response: {0}")]
    Parse(String),

    /// The backend refused to generate for this input.
    #[error("Generation rejected: {0}")]
    Rejected(String),

    /// The provider configuration cannot serve the requested kind.
    #[error("Unsupported provider: {0}")]
    Unsupported(String),
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unsupported(msg) => CoreError::Configuration(msg),
            other => CoreError::Backend(other.to_string()),
        }
    }
}
