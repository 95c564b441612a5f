//! Error types for the cache layer

use thiserror::Error;

/// Result type alias for internal cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache error types
///
/// These never escape the public cache surface directly: every component
/// folds them into a [`CacheResult`](crate::CacheResult) with `success=false`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Caching is switched off by configuration
    #[error("disabled")]
    Disabled,

    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Backing store returned an error
    #[error("Server error: {0}")]
    ServerError(String),

    /// Invalid response from the backing store
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid argument, e.g. coordinates out of range
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A bulk delete stopped part way; earlier deletions stand
    #[error("Bulk delete interrupted after {deleted} keys: {reason}")]
    PartialDelete { deleted: usize, reason: String },

    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether this error only reflects the disabled-cache state
    pub fn is_disabled(&self) -> bool {
        matches!(self, CacheError::Disabled)
    }

    /// Account for `prior` keys already deleted earlier in the same bulk
    /// operation, so the reported count covers the whole operation.
    pub(crate) fn with_prior_deletions(self, prior: usize) -> Self {
        match self {
            CacheError::PartialDelete { deleted, reason } => CacheError::PartialDelete {
                deleted: deleted + prior,
                reason,
            },
            other if prior > 0 => CacheError::PartialDelete {
                deleted: prior,
                reason: other.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_message() {
        assert_eq!(CacheError::Disabled.to_string(), "disabled");
        assert!(CacheError::Disabled.is_disabled());
    }

    #[test]
    fn test_prior_deletions_accumulate() {
        let err = CacheError::PartialDelete {
            deleted: 2,
            reason: "timeout".into(),
        }
        .with_prior_deletions(3);
        assert!(matches!(err, CacheError::PartialDelete { deleted: 5, .. }));

        let err = CacheError::ServerError("down".into()).with_prior_deletions(4);
        assert!(matches!(err, CacheError::PartialDelete { deleted: 4, .. }));

        let err = CacheError::ServerError("down".into()).with_prior_deletions(0);
        assert!(matches!(err, CacheError::ServerError(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: CacheError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error"));
        assert!(!err.is_disabled());
    }
}
