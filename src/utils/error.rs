//! Error handling for m3u-resolver

use thiserror::Error;

/// Main error type for m3u-resolver
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("yt-dlp not found. Please install yt-dlp")]
    YtDlpNotFound,

    #[error("[{engine}] extraction failed: {reason}")]
    Extraction { engine: String, reason: String },

    #[error("all resolvers failed: {0}")]
    AllResolversFailed(String),

    #[error("no resolver can handle URL: {0}")]
    NoCapabilityMatch(String),

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl ResolverError {
    /// Build an extraction failure tagged with the engine that produced it.
    pub fn extraction(engine: &str, reason: impl Into<String>) -> Self {
        Self::Extraction {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }
}
