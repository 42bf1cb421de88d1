use std::time::Duration;
use thiserror::Error;

/// Main error type for cache operations
///
/// Tier-local failures are absorbed at the tier boundary (a failed read is a
/// miss, a failed write is `false`), so most of these variants only reach a
/// caller from constructors and from the background components.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Remote store unavailable")]
    Unavailable,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Component is shut down")]
    Closed,
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for CacheError {
    fn from(e: bincode::error::EncodeError) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for CacheError {
    fn from(e: bincode::error::DecodeError) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for CacheError {
    fn from(e: base64::DecodeError) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(e: serde_yaml::Error) -> Self {
        CacheError::Config(e.to_string())
    }
}

impl CacheError {
    /// Whether the error is a construction-time misconfiguration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidTtl(_) | Self::InvalidUrl(_)
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
