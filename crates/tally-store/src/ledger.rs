//! # Quantity Ledger
//!
//! The derived `offline_quantity` overlay for stock-ins.
//!
//! ## Single Source of Truth
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  Quantity Ledger Derivation                         │
//! │                                                                     │
//! │  base  = stock-in's effective quantity                              │
//! │          (reconciled quantity, patched by its own pending update,   │
//! │           or the pending add's quantity if unsynced)                │
//! │                                                                     │
//! │  net   = Σ over pending stock-out / sales-return mutations:         │
//! │            add     → full signed delta                              │
//! │            update  → (patched delta − reconciled delta)             │
//! │            delete  → −(reconciled delta)                            │
//! │                                                                     │
//! │  available = base + net                                             │
//! │                                                                     │
//! │  Overlay row exists  ⇔  net ≠ 0.                                    │
//! │  The overlay is REBUILT from scratch inside the same transaction    │
//! │  as every queue change and every fetch pass - it is derived state,  │
//! │  never incrementally drifted. The reconciled quantity itself is     │
//! │  only ever replaced by server truth.                                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every lookup of "how much is available right now" goes through
//! [`QuantityLedger::available_tx`] - the admission check, the merged read
//! view and the fetch pass all see the same number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use tally_core::{
    EntityKind, QueuedAdd, QueuedDelete, QueuedUpdate, SalesReturn, StockIn, StockOut, SyncRecord,
};

use crate::error::StoreResult;
use crate::pool::{Store, StoreTx};
use crate::tables::{table, Bucket};

/// A persisted overlay row: the available quantity of one stock-in after
/// all pending local mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overlay {
    /// `base + net` - what display and admission checks should use.
    pub available: i64,

    /// When the overlay was last rebuilt.
    pub updated_at: DateTime<Utc>,
}

/// The quantity ledger over stock-in overlays.
#[derive(Debug, Clone)]
pub struct QuantityLedger {
    store: Store,
}

impl QuantityLedger {
    pub fn new(store: Store) -> Self {
        QuantityLedger { store }
    }

    fn overlay_tbl() -> String {
        table(EntityKind::StockIn, Bucket::QtyOverlay)
    }

    // =========================================================================
    // Canonical ids
    // =========================================================================

    /// Resolves a stock-in reference to its canonical id: the server id when
    /// a sync mapping exists, the given id otherwise.
    ///
    /// Referencing records may carry either id; canonicalizing before every
    /// ledger operation is what keeps one stock-in from splitting into two
    /// overlay rows.
    pub async fn canonical_stock_in_tx(&self, tx: &mut StoreTx, id: &str) -> StoreResult<String> {
        let mapped = self
            .store
            .mappings(EntityKind::StockIn)
            .server_for_tx(tx, id)
            .await?;
        Ok(mapped.unwrap_or_else(|| id.to_string()))
    }

    // =========================================================================
    // The one authoritative lookup
    // =========================================================================

    /// The available quantity of a stock-in (canonical id), or `None` if no
    /// such stock-in exists locally.
    pub async fn available_tx(&self, tx: &mut StoreTx, canonical: &str) -> StoreResult<Option<i64>> {
        let base = match self.effective_base_tx(tx, canonical).await? {
            Some(base) => base,
            None => return Ok(None),
        };
        let net = self.net_pending_tx(tx, canonical).await?;
        Ok(Some(base + net))
    }

    /// Convenience wrapper that runs [`available_tx`](Self::available_tx) in
    /// its own read transaction.
    pub async fn available(&self, id: &str) -> StoreResult<Option<i64>> {
        let mut tx = self.store.begin().await?;
        let canonical = self.canonical_stock_in_tx(&mut tx, id).await?;
        let result = self.available_tx(&mut tx, &canonical).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Reads the persisted overlay row, if one exists.
    pub async fn overlay_tx(&self, tx: &mut StoreTx, canonical: &str) -> StoreResult<Option<Overlay>> {
        tx.get_doc(&Self::overlay_tbl(), canonical).await
    }

    // =========================================================================
    // Rebuild
    // =========================================================================

    /// Rebuilds the overlay rows for the given canonical stock-in ids.
    ///
    /// Call this inside the same transaction as the queue change (or fetch)
    /// that invalidated them.
    pub async fn rebuild_for_tx(&self, tx: &mut StoreTx, canonicals: &[String]) -> StoreResult<()> {
        let tbl = Self::overlay_tbl();

        for canonical in canonicals {
            let base = self.effective_base_tx(tx, canonical).await?;
            let net = self.net_pending_tx(tx, canonical).await?;

            match base {
                Some(base) if net != 0 => {
                    let overlay = Overlay {
                        available: base + net,
                        updated_at: Utc::now(),
                    };
                    tx.put_doc(&tbl, canonical, &overlay).await?;
                }
                // No pending effect (or no such stock-in): the overlay
                // disappears and display falls back to server truth.
                _ => tx.delete(&tbl, canonical).await?,
            }
        }

        Ok(())
    }

    /// Rebuilds every overlay: all currently persisted overlay keys plus
    /// every stock-in referenced by a pending mutation. Run after a fetch
    /// pass replaced the reconciled tables.
    pub async fn rebuild_all_tx(&self, tx: &mut StoreTx) -> StoreResult<()> {
        let mut candidates: BTreeSet<String> = BTreeSet::new();

        for (key, _) in tx
            .scan_docs::<Overlay>(&Self::overlay_tbl())
            .await?
        {
            candidates.insert(key);
        }

        for id in self.referenced_stock_ins_tx(tx).await? {
            candidates.insert(id);
        }

        let canonicals: Vec<String> = candidates.into_iter().collect();
        self.rebuild_for_tx(tx, &canonicals).await
    }

    // =========================================================================
    // Derivation internals
    // =========================================================================

    /// The stock-in's own effective quantity: reconciled quantity with its
    /// own pending update patch applied, or the pending add's quantity for
    /// an unsynced stock-in.
    async fn effective_base_tx(&self, tx: &mut StoreTx, canonical: &str) -> StoreResult<Option<i64>> {
        let all_tbl = table(EntityKind::StockIn, Bucket::All);
        if let Some(record) = tx.get_doc::<StockIn>(&all_tbl, canonical).await? {
            let upd_tbl = table(EntityKind::StockIn, Bucket::OfflineUpdate);
            if let Some(update) = tx.get_doc::<QueuedUpdate>(&upd_tbl, canonical).await? {
                if let Ok(patched) = update.patch.apply_to(&record) {
                    return Ok(Some(patched.quantity));
                }
            }
            return Ok(Some(record.quantity));
        }

        let add_tbl = table(EntityKind::StockIn, Bucket::OfflineAdd);
        if let Some(queued) = tx.get_doc::<QueuedAdd<StockIn>>(&add_tbl, canonical).await? {
            return Ok(Some(queued.record.quantity));
        }

        Ok(None)
    }

    /// Net signed delta of every pending mutation that touches the given
    /// stock-in.
    async fn net_pending_tx(&self, tx: &mut StoreTx, canonical: &str) -> StoreResult<i64> {
        let mut net = 0;
        net += self.net_for_kind_tx::<StockOut>(tx, canonical).await?;
        net += self.net_for_kind_tx::<SalesReturn>(tx, canonical).await?;
        Ok(net)
    }

    async fn net_for_kind_tx<R: SyncRecord>(
        &self,
        tx: &mut StoreTx,
        canonical: &str,
    ) -> StoreResult<i64> {
        let add_tbl = table(R::KIND, Bucket::OfflineAdd);
        let upd_tbl = table(R::KIND, Bucket::OfflineUpdate);
        let del_tbl = table(R::KIND, Bucket::OfflineDelete);
        let all_tbl = table(R::KIND, Bucket::All);

        let mut net = 0;

        // Pending adds: their full effect is not yet on the server.
        for (_, queued) in tx.scan_docs::<QueuedAdd<R>>(&add_tbl).await? {
            if let Some(effect) = queued.record.quantity_effect() {
                if self.canonical_stock_in_tx(tx, &effect.stock_in).await? == canonical {
                    net += effect.delta;
                }
            }
        }

        // Pending updates: only the difference against the acknowledged
        // record is pending.
        for (key, queued) in tx.scan_docs::<QueuedUpdate>(&upd_tbl).await? {
            let Some(record) = tx.get_doc::<R>(&all_tbl, &key).await? else {
                continue;
            };
            let old = record.quantity_effect();
            let new = queued
                .patch
                .apply_to(&record)
                .ok()
                .and_then(|patched| patched.quantity_effect());

            if let Some(old) = old {
                if self.canonical_stock_in_tx(tx, &old.stock_in).await? == canonical {
                    net -= old.delta;
                }
            }
            if let Some(new) = new {
                if self.canonical_stock_in_tx(tx, &new.stock_in).await? == canonical {
                    net += new.delta;
                }
            }
        }

        // Pending deletes: reverse the acknowledged effect.
        for (key, _) in tx.scan_docs::<QueuedDelete>(&del_tbl).await? {
            let Some(record) = tx.get_doc::<R>(&all_tbl, &key).await? else {
                continue;
            };
            if let Some(effect) = record.quantity_effect() {
                if self.canonical_stock_in_tx(tx, &effect.stock_in).await? == canonical {
                    net -= effect.delta;
                }
            }
        }

        Ok(net)
    }

    /// Every canonical stock-in id referenced by a pending mutation of any
    /// quantity-affecting kind.
    async fn referenced_stock_ins_tx(&self, tx: &mut StoreTx) -> StoreResult<Vec<String>> {
        let mut ids = BTreeSet::new();
        self.collect_refs_tx::<StockOut>(tx, &mut ids).await?;
        self.collect_refs_tx::<SalesReturn>(tx, &mut ids).await?;
        Ok(ids.into_iter().collect())
    }

    async fn collect_refs_tx<R: SyncRecord>(
        &self,
        tx: &mut StoreTx,
        ids: &mut BTreeSet<String>,
    ) -> StoreResult<()> {
        let add_tbl = table(R::KIND, Bucket::OfflineAdd);
        let upd_tbl = table(R::KIND, Bucket::OfflineUpdate);
        let del_tbl = table(R::KIND, Bucket::OfflineDelete);
        let all_tbl = table(R::KIND, Bucket::All);

        for (_, queued) in tx.scan_docs::<QueuedAdd<R>>(&add_tbl).await? {
            if let Some(r) = queued.record.referenced_stock_in() {
                let r = r.to_string();
                ids.insert(self.canonical_stock_in_tx(tx, &r).await?);
            }
        }

        let mut target_keys = Vec::new();
        for (key, _) in tx.scan_docs::<QueuedUpdate>(&upd_tbl).await? {
            target_keys.push(key);
        }
        for (key, _) in tx.scan_docs::<QueuedDelete>(&del_tbl).await? {
            target_keys.push(key);
        }
        for key in target_keys {
            if let Some(record) = tx.get_doc::<R>(&all_tbl, &key).await? {
                if let Some(r) = record.referenced_stock_in() {
                    let r = r.to_string();
                    ids.insert(self.canonical_stock_in_tx(tx, &r).await?);
                }
            }
        }

        Ok(())
    }
}
