//! # Store Error Types
//!
//! Error types for local durable store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                │
//! │                                                                     │
//! │  SQLite error (sqlx::Error)                                         │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  StoreError (this module) ← adds context and categorization         │
//! │       │                                                             │
//! │       ├── StoreError::Validation ← surfaced synchronously to the    │
//! │       │                            submit_* caller                  │
//! │       ▼                                                             │
//! │  SyncError (tally-sync) ← everything else, recorded per mutation    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use tally_core::ValidationError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Local durable store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection failed (file missing, permissions, disk full).
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction begin/commit failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A stored document failed to decode.
    #[error("Corrupt row in {table}/{key}: {reason}")]
    Corrupt {
        table: String,
        key: String,
        reason: String,
    },

    /// JSON encode/decode failure outside a specific row context.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Admission check rejected a mutation before it was queued.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl StoreError {
    /// Wraps a JSON error with the row it came from.
    pub fn corrupt(table: &str, key: &str, err: serde_json::Error) -> Self {
        StoreError::Corrupt {
            table: table.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convert sqlx errors to StoreError.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::PoolExhausted,
            sqlx::Error::PoolClosed => StoreError::ConnectionFailed("Pool is closed".to_string()),
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}
