use thiserror::Error;

/// Errors from remote model calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// A network error occurred during the API call.
    #[error("network: {0}")]
    Network(String),

    /// The model provider returned an error response.
    #[error("provider api: {0}")]
    Api(String),

    /// The provider response could not be parsed.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether retrying the call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
