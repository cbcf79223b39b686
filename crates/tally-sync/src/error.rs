//! # Sync Error Types
//!
//! Error taxonomy for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                         │
//! │                                                                     │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────┐  │
//! │  │  Validation     │  │   Remote API    │  │     Engine          │  │
//! │  │                 │  │                 │  │                     │  │
//! │  │  rejected pre-  │  │  Transient      │  │  InvalidConfig      │  │
//! │  │  queue, sync-   │  │  Conflict (OK!) │  │  Store              │  │
//! │  │  hronous        │  │  NotFound       │  │  Channel            │  │
//! │  │                 │  │  Rejected       │  │                     │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────┘  │
//! │                                                                     │
//! │  Conflict is never surfaced as a failure: the server already holds  │
//! │  the equivalent operation, which IS the desired end state.          │
//! │  Transient failures retry up to the cap, then evict (reported).     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use tally_core::ValidationError;
use tally_store::StoreError;

use crate::remote::ApiError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync engine errors.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Admission Errors (synchronous, surfaced to the submit_* caller)
    // =========================================================================
    /// The mutation was rejected before it entered the queue.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Durable store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Remote API failure that aborted an operation outside the per-mutation
    /// retry bookkeeping (e.g. the reconciliation fetch).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Internal channel send/receive failed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            // Keep validation failures recognizable: the UI handles them
            // very differently from infrastructure failures.
            StoreError::Validation(v) => SyncError::Validation(v),
            other => SyncError::Store(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation can meaningfully be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Api(api) => api.is_retryable(),
            SyncError::Store(_) | SyncError::Channel(_) => true,
            _ => false,
        }
    }

    /// Returns true for admission failures the UI should show inline.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_stays_recognizable_through_store() {
        let store_err = StoreError::Validation(ValidationError::required("customer"));
        let sync_err: SyncError = store_err.into();
        assert!(sync_err.is_validation());
        assert!(!sync_err.is_retryable());
    }

    #[test]
    fn test_retryable_categories() {
        assert!(SyncError::Api(ApiError::Transient("503".into())).is_retryable());
        assert!(!SyncError::Api(ApiError::Rejected("bad payload".into())).is_retryable());
        assert!(!SyncError::InvalidConfig("x".into()).is_retryable());
    }
}
