//! # Logical Table Names
//!
//! Each entity kind owns a fixed family of logical tables inside the store.
//! Names are derived, never written by hand, so a typo cannot silently
//! create a sixth bucket.

use tally_core::EntityKind;

/// The per-entity buckets of the persisted state layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Last server-confirmed (reconciled) records, keyed by server id.
    All,
    /// Locally created records awaiting acknowledgement, keyed by local id.
    OfflineAdd,
    /// Locally modified records awaiting acknowledgement, keyed by target.
    OfflineUpdate,
    /// Locally deleted records awaiting acknowledgement, keyed by server id.
    OfflineDelete,
    /// Sync mappings (local id → server id), keyed by local id.
    SyncedIds,
    /// Derived offline-quantity overlays, keyed by canonical stock-in id.
    QtyOverlay,
}

impl Bucket {
    fn suffix(&self) -> &'static str {
        match self {
            Bucket::All => "all",
            Bucket::OfflineAdd => "offline_add",
            Bucket::OfflineUpdate => "offline_update",
            Bucket::OfflineDelete => "offline_delete",
            Bucket::SyncedIds => "synced_ids",
            Bucket::QtyOverlay => "qty_overlay",
        }
    }
}

/// Logical table name for a kind/bucket pair, e.g. `stockins_offline_add`.
pub fn table(kind: EntityKind, bucket: Bucket) -> String {
    format!("{}_{}", kind.table_prefix(), bucket.suffix())
}

/// The shared metadata logical table (fetch watermarks).
pub const META_TABLE: &str = "meta";

/// Meta key for an entity kind's last reconciliation fetch.
pub fn last_fetch_key(kind: EntityKind) -> String {
    format!("{}:last_fetch_at", kind.table_prefix())
}

/// Meta key for an entity kind's last completed sync pass.
pub fn last_sync_key(kind: EntityKind) -> String {
    format!("{}:last_sync_at", kind.table_prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(table(EntityKind::StockIn, Bucket::All), "stockins_all");
        assert_eq!(
            table(EntityKind::StockOut, Bucket::OfflineAdd),
            "stockouts_offline_add"
        );
        assert_eq!(
            table(EntityKind::SalesReturn, Bucket::SyncedIds),
            "salesreturns_synced_ids"
        );
        assert_eq!(
            table(EntityKind::StockIn, Bucket::QtyOverlay),
            "stockins_qty_overlay"
        );
    }

    #[test]
    fn test_last_fetch_key() {
        assert_eq!(last_fetch_key(EntityKind::Backorder), "backorders:last_fetch_at");
    }
}
