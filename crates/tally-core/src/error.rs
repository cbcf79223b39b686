//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                 │
//! │                                                                     │
//! │  tally-core errors (this file)                                      │
//! │  └── ValidationError  - rejected before a mutation is queued        │
//! │                                                                     │
//! │  tally-store errors (separate crate)                                │
//! │  └── StoreError       - durable store failures                      │
//! │                                                                     │
//! │  tally-sync errors (separate crate)                                 │
//! │  └── SyncError        - orchestrator / remote API failures          │
//! │                                                                     │
//! │  Flow: ValidationError → caller (synchronous)                       │
//! │        StoreError / ApiError → SyncError → pass report              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (record id, quantities, etc.)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Validation Error
// =============================================================================

/// Validation failures surfaced synchronously to the caller, before a
/// mutation is admitted to the queue.
///
/// This is the only error a `submit_*` call can return: everything that can
/// go wrong later (network, server, retries) is reported through the sync
/// pass result instead.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// The one quantity consistency check: applying this mutation would
    /// drive the referenced stock-in's available quantity negative.
    #[error("insufficient quantity for stock-in {stock_in}: available {available}, requested {requested}")]
    InsufficientQuantity {
        stock_in: String,
        available: i64,
        requested: i64,
    },

    /// A patch could not be interpreted or applied to the record.
    #[error("invalid patch: {reason}")]
    InvalidPatch { reason: String },

    /// The targeted record does not exist locally (neither reconciled nor
    /// pending).
    #[error("unknown record: {id}")]
    UnknownRecord { id: String },
}

impl ValidationError {
    /// Shorthand for a missing-field error.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

/// Convenience type alias for validation results.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Quantity admission check
// =============================================================================

/// Applies a signed quantity delta against an available balance.
///
/// Returns the new balance, or [`ValidationError::InsufficientQuantity`] if
/// the delta would take the balance below zero. This is the single admission
/// check the mutation queue performs before persisting a mutation.
pub fn apply_quantity_delta(
    stock_in: &str,
    available: i64,
    delta: i64,
) -> ValidationResult<i64> {
    let next = available + delta;
    if next < 0 {
        return Err(ValidationError::InsufficientQuantity {
            stock_in: stock_in.to_string(),
            available,
            requested: -delta,
        });
    }
    Ok(next)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_within_balance() {
        assert_eq!(apply_quantity_delta("si-1", 10, -3).unwrap(), 7);
        assert_eq!(apply_quantity_delta("si-1", 7, 3).unwrap(), 10);
        assert_eq!(apply_quantity_delta("si-1", 3, -3).unwrap(), 0);
    }

    #[test]
    fn test_delta_below_zero_rejected() {
        let err = apply_quantity_delta("si-1", 2, -3).unwrap_err();
        match err {
            ValidationError::InsufficientQuantity {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 2);
                assert_eq!(requested, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::InsufficientQuantity {
            stock_in: "si-9".to_string(),
            available: 1,
            requested: 4,
        };
        assert_eq!(
            err.to_string(),
            "insufficient quantity for stock-in si-9: available 1, requested 4"
        );
    }
}
