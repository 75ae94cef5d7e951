//! Error types for carnet

use thiserror::Error;

/// Result type alias for carnet operations
pub type Result<T> = std::result::Result<T, CarnetError>;

/// Main error type for carnet
#[derive(Error, Debug)]
pub enum CarnetError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Sync error: {0}")]
    Sync(String),

    /// The target refused the content (size limit, policy). Retrying cannot
    /// change the outcome; the item is flagged sync-disabled instead.
    #[error("Rejected by target: {path}: {reason}")]
    RejectedByTarget { path: String, reason: String },

    /// Bulk-deletion guard tripped. Never retried; clearing it requires the
    /// `sync.fail_safe` setting to be switched off explicitly.
    #[error("Fail-safe: {0}")]
    FailSafeTriggered(String),

    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Authentication expired")]
    AuthExpired,

    /// The backend invalidated our delta continuation token. The persisted
    /// context must be discarded and the scan restarted from scratch.
    #[error("Resync required: {0}")]
    ResyncRequired(String),
}

impl CarnetError {
    /// Retry policy table. Only errors where a repeat attempt can plausibly
    /// succeed are listed; target rejection and fail-safe aborts are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CarnetError::Io(_) | CarnetError::Transient(_) | CarnetError::RateLimited(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        assert!(CarnetError::Transient("timeout".into()).is_retryable());
        assert!(CarnetError::RateLimited(30).is_retryable());
        assert!(!CarnetError::RejectedByTarget {
            path: "a.json".into(),
            reason: "too large".into()
        }
        .is_retryable());
        assert!(!CarnetError::FailSafeTriggered("95% missing".into()).is_retryable());
        assert!(!CarnetError::AuthExpired.is_retryable());
        assert!(!CarnetError::ResyncRequired("cursor expired".into()).is_retryable());
    }
}
