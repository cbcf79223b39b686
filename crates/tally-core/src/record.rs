//! # Record Trait & Patches
//!
//! The seam between the generic sync engine and the concrete record types.
//!
//! ## Dual-Key Identity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Record Identity Lifecycle                       │
//! │                                                                     │
//! │  CREATED OFFLINE            SYNCED                                  │
//! │  ──────────────             ──────                                  │
//! │  local_id:  "c0ffee…"       local_id:  "c0ffee…"                    │
//! │  server_id: None       ──►  server_id: Some("srv-42")               │
//! │                             + sync mapping {local_id, server_id}    │
//! │                                                                     │
//! │  Exactly one of the two identifies a record before sync completes;  │
//! │  afterwards both are linked through the mapping table.              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reconcile Precedence
//! Merging server state into local state is an explicit function, not a
//! field-spread: the server wins for every field it returns, the local side
//! wins only for fields the server never returns (the provisional
//! `local_id`).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{ValidationError, ValidationResult};
use crate::idempotency::IdempotencyKey;
use crate::types::EntityKind;

// =============================================================================
// Record Reference
// =============================================================================

/// Identifies a record by whichever key the caller knows.
///
/// Records created offline only have a provisional local id until the first
/// successful sync; records that arrived through a fetch pass only have a
/// server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "side", content = "id", rename_all = "snake_case")]
pub enum RecordRef {
    /// Client-assigned provisional identifier.
    Local(String),
    /// Server-assigned authoritative identifier.
    Server(String),
}

impl RecordRef {
    /// The raw key string, regardless of side.
    pub fn key(&self) -> &str {
        match self {
            RecordRef::Local(id) | RecordRef::Server(id) => id,
        }
    }

    /// True for client-assigned provisional ids.
    pub fn is_local(&self) -> bool {
        matches!(self, RecordRef::Local(_))
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::Local(id) => write!(f, "local:{id}"),
            RecordRef::Server(id) => write!(f, "server:{id}"),
        }
    }
}

// =============================================================================
// Quantity Effect
// =============================================================================

/// The signed effect a record has on a stock-in's available quantity.
///
/// Negative deltas consume stock (a sale), positive deltas restore it
/// (a return). Records with no effect (backorders) return `None` from
/// [`SyncRecord::quantity_effect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityEffect {
    /// Id of the stock-in whose quantity is affected (local or server id,
    /// whichever the referencing record carries).
    pub stock_in: String,

    /// Signed quantity delta applied to the available balance.
    pub delta: i64,
}

impl QuantityEffect {
    /// A consuming effect (stock-out of `quantity` units).
    pub fn consume(stock_in: impl Into<String>, quantity: i64) -> Self {
        QuantityEffect {
            stock_in: stock_in.into(),
            delta: -quantity,
        }
    }

    /// A restoring effect (return of `quantity` units).
    pub fn restore(stock_in: impl Into<String>, quantity: i64) -> Self {
        QuantityEffect {
            stock_in: stock_in.into(),
            delta: quantity,
        }
    }
}

// =============================================================================
// Patch
// =============================================================================

/// Field names a patch may never overwrite.
///
/// Identity and server-authoritative bookkeeping only change through the
/// engine itself, never through a UI-originated patch.
const PROTECTED_FIELDS: &[&str] = &["local_id", "server_id", "created_at", "version"];

/// A shallow JSON merge patch against a record.
///
/// Later patches merged into the same queued update overwrite earlier keys,
/// which is what keeps the "at most one outstanding update per record"
/// invariant lossless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
    /// An empty patch.
    pub fn new() -> Self {
        Patch(Map::new())
    }

    /// Builds a patch from a JSON object value.
    pub fn from_value(value: Value) -> ValidationResult<Self> {
        match value {
            Value::Object(map) => Ok(Patch(map)),
            other => Err(ValidationError::InvalidPatch {
                reason: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    /// Sets a single field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Merges `later` into this patch; keys in `later` win.
    pub fn merge(&mut self, later: &Patch) {
        for (k, v) in &later.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// True when the patch carries no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the patched value of `field`, if the patch sets it.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Applies the patch to a record, returning the patched copy.
    ///
    /// Protected identity fields in the patch are ignored. Any field the
    /// record type does not know, or a type mismatch, is rejected as
    /// [`ValidationError::InvalidPatch`].
    pub fn apply_to<R>(&self, record: &R) -> ValidationResult<R>
    where
        R: Serialize + DeserializeOwned,
    {
        let mut value = serde_json::to_value(record).map_err(|e| ValidationError::InvalidPatch {
            reason: e.to_string(),
        })?;

        let obj = value
            .as_object_mut()
            .ok_or_else(|| ValidationError::InvalidPatch {
                reason: "record did not serialize to an object".to_string(),
            })?;

        for (field, patched) in &self.0 {
            if PROTECTED_FIELDS.contains(&field.as_str()) {
                continue;
            }
            obj.insert(field.clone(), patched.clone());
        }

        serde_json::from_value(value).map_err(|e| ValidationError::InvalidPatch {
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// SyncRecord Trait
// =============================================================================

/// Implemented by every record type the sync engine manages.
///
/// The engine is generic over this trait: the mutation queue, the quantity
/// ledger, the orchestrator passes and the remote client all speak
/// `R: SyncRecord` and never mention a concrete record type.
pub trait SyncRecord:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The entity kind this record type belongs to (fixes table names and
    /// API paths).
    const KIND: EntityKind;

    /// Client-assigned provisional id. Always present once queued.
    fn local_id(&self) -> &str;

    /// Re-assigns the provisional id (done once, at enqueue time).
    fn set_local_id(&mut self, id: String);

    /// Server-assigned authoritative id, absent until synced.
    fn server_id(&self) -> Option<&str>;

    /// Links the record to its server identity.
    fn set_server_id(&mut self, id: Option<String>);

    /// Server-maintained version counter (carried as `base_version` on
    /// queued updates).
    fn version(&self) -> i64;

    /// Creation timestamp, used by the content-duplicate window check.
    fn created_at(&self) -> DateTime<Utc>;

    /// The record's effect on a stock-in's available quantity, if any.
    fn quantity_effect(&self) -> Option<QuantityEffect> {
        None
    }

    /// Id of the stock-in this record references, if any.
    fn referenced_stock_in(&self) -> Option<&str> {
        None
    }

    /// Rewrites the stock-in reference (local id → server id) once the
    /// referenced record has a sync mapping.
    fn set_referenced_stock_in(&mut self, _id: String) {}

    /// Content identity for duplicate-submission detection: referenced id,
    /// quantity and counterpart fields - everything except ids and
    /// timestamps.
    fn content_fingerprint(&self) -> String;

    /// Deterministic idempotency key for this record's `Add` mutation.
    fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(
            Self::KIND,
            self.local_id(),
            self.created_at(),
            self.referenced_stock_in(),
            self.quantity_effect().map(|e| e.delta).unwrap_or(0),
        )
    }

    /// Field-level admission checks performed before queuing.
    fn validate(&self) -> ValidationResult<()>;

    /// Decorates the record with its ledger overlay when one exists.
    ///
    /// Only quantity-bearing records do anything here; everything else
    /// ignores it, which is what lets the merged read view stay generic.
    fn apply_overlay(&mut self, _available: i64) {}

    /// Merges freshly fetched server state into known local state.
    ///
    /// Server-authoritative fields win wholesale; the only thing the local
    /// side keeps is what the server never returns - the provisional
    /// `local_id` linkage.
    fn reconcile(local: &Self, remote: Self) -> Self {
        let mut merged = remote;
        merged.set_local_id(local.local_id().to_string());
        merged
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ref_key() {
        let local = RecordRef::Local("abc".into());
        let server = RecordRef::Server("srv-1".into());
        assert_eq!(local.key(), "abc");
        assert!(local.is_local());
        assert_eq!(server.key(), "srv-1");
        assert!(!server.is_local());
    }

    #[test]
    fn test_quantity_effect_signs() {
        assert_eq!(QuantityEffect::consume("si", 3).delta, -3);
        assert_eq!(QuantityEffect::restore("si", 3).delta, 3);
    }

    #[test]
    fn test_patch_merge_later_wins() {
        let mut first = Patch::new().set("quantity", 3).set("customer", "Ada");
        let second = Patch::new().set("quantity", 5);
        first.merge(&second);
        assert_eq!(first.get("quantity"), Some(&Value::from(5)));
        assert_eq!(first.get("customer"), Some(&Value::from("Ada")));
    }

    #[test]
    fn test_patch_rejects_non_object() {
        assert!(Patch::from_value(Value::from(42)).is_err());
        assert!(Patch::from_value(serde_json::json!({"a": 1})).is_ok());
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Dummy {
        local_id: String,
        quantity: i64,
    }

    #[test]
    fn test_patch_skips_protected_fields() {
        let dummy = Dummy {
            local_id: "keep-me".into(),
            quantity: 1,
        };
        let patch = Patch::new().set("local_id", "overwritten").set("quantity", 9);
        let patched = patch.apply_to(&dummy).unwrap();
        assert_eq!(patched.local_id, "keep-me");
        assert_eq!(patched.quantity, 9);
    }

    #[test]
    fn test_patch_type_mismatch_rejected() {
        let dummy = Dummy {
            local_id: "x".into(),
            quantity: 1,
        };
        let patch = Patch::new().set("quantity", "not a number");
        assert!(matches!(
            patch.apply_to(&dummy),
            Err(ValidationError::InvalidPatch { .. })
        ));
    }
}
