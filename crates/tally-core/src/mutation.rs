//! # Pending Mutations
//!
//! The queued forms of locally-originated, not-yet-acknowledged operations.
//!
//! ## Queue Invariants
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Pending Mutation Invariants                      │
//! │                                                                     │
//! │  offline_add     keyed by local_id   - one add per created record   │
//! │  offline_update  keyed by target     - AT MOST ONE update per       │
//! │                                        record; later edits merge    │
//! │                                        into the queued patch        │
//! │  offline_delete  keyed by target     - only for already-synced      │
//! │                                        records (an unsynced add is  │
//! │                                        simply dropped instead)      │
//! │                                                                     │
//! │  Every queued form embeds the same SyncAttempts bookkeeping so one  │
//! │  RetryPolicy can decide eviction for all three.                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Patch, RecordRef};

// =============================================================================
// Mutation Kind
// =============================================================================

/// Which queue a mutation lives in. Used for reporting and idempotency-key
/// derivation, not for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Add => write!(f, "add"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Sync Attempts
// =============================================================================

/// Failure bookkeeping shared by all mutation kinds.
///
/// The retry cap itself lives in the engine's `RetryPolicy`; this struct
/// only records what happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncAttempts {
    /// Number of failed sync attempts so far.
    pub retry_count: u32,

    /// When the last attempt was made.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Error message from the last failed attempt.
    pub last_error: Option<String>,
}

impl SyncAttempts {
    /// Fresh bookkeeping for a newly queued mutation.
    pub fn new() -> Self {
        SyncAttempts::default()
    }

    /// Records one failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
    }
}

// =============================================================================
// Queued Forms
// =============================================================================

/// A locally created record awaiting its first acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAdd<R> {
    /// The full record as it should be created on the server.
    pub record: R,

    /// When the mutation entered the queue (drain order).
    pub enqueued_at: DateTime<Utc>,

    /// Failure bookkeeping.
    pub attempts: SyncAttempts,
}

impl<R> QueuedAdd<R> {
    pub fn new(record: R, enqueued_at: DateTime<Utc>) -> Self {
        QueuedAdd {
            record,
            enqueued_at,
            attempts: SyncAttempts::new(),
        }
    }
}

/// A locally modified record awaiting acknowledgement.
///
/// There is at most one of these per logical record: a second edit merges
/// its patch into the queued one instead of appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedUpdate {
    /// The record being modified.
    pub target: RecordRef,

    /// Accumulated field changes.
    pub patch: Patch,

    /// Record version the first edit was made against.
    pub base_version: i64,

    pub enqueued_at: DateTime<Utc>,

    pub attempts: SyncAttempts,
}

impl QueuedUpdate {
    pub fn new(target: RecordRef, patch: Patch, base_version: i64, enqueued_at: DateTime<Utc>) -> Self {
        QueuedUpdate {
            target,
            patch,
            base_version,
            enqueued_at,
            attempts: SyncAttempts::new(),
        }
    }
}

/// A locally deleted, already-synced record awaiting acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedDelete {
    /// The record being deleted.
    pub target: RecordRef,

    pub enqueued_at: DateTime<Utc>,

    pub attempts: SyncAttempts,
}

impl QueuedDelete {
    pub fn new(target: RecordRef, enqueued_at: DateTime<Utc>) -> Self {
        QueuedDelete {
            target,
            enqueued_at,
            attempts: SyncAttempts::new(),
        }
    }
}

// =============================================================================
// Eviction Notice
// =============================================================================

/// A mutation removed from its queue after exhausting the retry cap.
///
/// Evictions are always surfaced in the pass report - a dropped mutation the
/// user never hears about is data loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictedMutation {
    /// Entity kind the mutation belonged to.
    pub entity: crate::types::EntityKind,

    /// Which queue it was evicted from.
    pub kind: MutationKind,

    /// The queue key (local id for adds, target id otherwise).
    pub key: String,

    /// Error message from the last failed attempt.
    pub last_error: Option<String>,
}

// =============================================================================
// Sync Mapping
// =============================================================================

/// The link between a provisional local id and the server id it became,
/// written the moment an add is acknowledged. Its presence is what makes a
/// retried add collapse instead of double-submitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMapping {
    pub local_id: String,
    pub server_id: String,
    pub synced_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_accumulate() {
        let mut attempts = SyncAttempts::new();
        assert_eq!(attempts.retry_count, 0);
        assert!(attempts.last_error.is_none());

        let now = Utc::now();
        attempts.record_failure("connection reset", now);
        attempts.record_failure("HTTP 503", now);

        assert_eq!(attempts.retry_count, 2);
        assert_eq!(attempts.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(attempts.last_attempt_at, Some(now));
    }

    #[test]
    fn test_queued_forms_round_trip() {
        let upd = QueuedUpdate::new(
            RecordRef::Server("srv-1".into()),
            Patch::new().set("quantity", 4),
            2,
            Utc::now(),
        );
        let json = serde_json::to_string(&upd).unwrap();
        let back: QueuedUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.target, upd.target);
        assert_eq!(back.base_version, 2);
        assert_eq!(back.patch.get("quantity"), upd.patch.get("quantity"));
    }
}
