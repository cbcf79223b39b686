//! # Idempotency Keys
//!
//! Deterministic keys that let the server (and local duplicate detection)
//! recognize repeated submissions of the same logical mutation.
//!
//! ## Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            Idempotency Key Derivation                               │
//! │                                                                     │
//! │  material = kind | local_id | created_at_millis | referenced | qty  │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  UUID v5 (SHA-1 name-based) under a fixed namespace                 │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  Same logical mutation ⇒ same key, on every retry, after every      │
//! │  process restart. A v4 (random) key would defeat the purpose.       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::EntityKind;

/// Namespace for name-based key derivation. Fixed forever: changing it would
/// re-key every in-flight mutation.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x7a11_90f5_1d3e_4c0a_9b2d_0c5e_1f88_4e21);

/// A deterministic identifier for one logical mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    /// Derives the key for an `Add` mutation from its identifying content.
    ///
    /// `referenced` is the referenced stock-in id (absent for records with
    /// no quantity effect); `quantity` is the signed delta.
    pub fn derive(
        kind: EntityKind,
        local_id: &str,
        created_at: DateTime<Utc>,
        referenced: Option<&str>,
        quantity: i64,
    ) -> Self {
        let material = format!(
            "{}|{}|{}|{}|{}",
            kind,
            local_id,
            created_at.timestamp_millis(),
            referenced.unwrap_or("-"),
            quantity
        );
        IdempotencyKey(Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, material.as_bytes()))
    }

    /// Derives the key for an `Update` or `Delete` mutation, which is
    /// identified by its target and the mutation kind tag instead of record
    /// content.
    pub fn derive_for_target(kind: EntityKind, mutation: &str, target_key: &str) -> Self {
        let material = format!("{kind}|{mutation}|{target_key}");
        IdempotencyKey(Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, material.as_bytes()))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_same_inputs_same_key() {
        let a = IdempotencyKey::derive(EntityKind::StockOut, "l-1", at(), Some("si-1"), -3);
        let b = IdempotencyKey::derive(EntityKind::StockOut, "l-1", at(), Some("si-1"), -3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_changed_input_changes_key() {
        let base = IdempotencyKey::derive(EntityKind::StockOut, "l-1", at(), Some("si-1"), -3);
        assert_ne!(
            base,
            IdempotencyKey::derive(EntityKind::StockOut, "l-2", at(), Some("si-1"), -3)
        );
        assert_ne!(
            base,
            IdempotencyKey::derive(EntityKind::StockOut, "l-1", at(), Some("si-2"), -3)
        );
        assert_ne!(
            base,
            IdempotencyKey::derive(EntityKind::StockOut, "l-1", at(), Some("si-1"), -4)
        );
        assert_ne!(
            base,
            IdempotencyKey::derive(EntityKind::SalesReturn, "l-1", at(), Some("si-1"), -3)
        );
    }

    #[test]
    fn test_target_keys_distinct_per_mutation_kind() {
        let upd = IdempotencyKey::derive_for_target(EntityKind::StockIn, "update", "srv-7");
        let del = IdempotencyKey::derive_for_target(EntityKind::StockIn, "delete", "srv-7");
        assert_ne!(upd, del);
    }
}
