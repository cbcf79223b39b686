//! # Mutation Queue Repository
//!
//! The `offline_add` / `offline_update` / `offline_delete` buckets of one
//! record type, with the admission rules that keep them consistent.
//!
//! ## Enqueue Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Enqueue Decision Table                          │
//! │                                                                     │
//! │  enqueue_add(record)                                                │
//! │    └── fresh local id, validate, quantity admission check,          │
//! │        persist add + rebuild overlay - ONE transaction              │
//! │                                                                     │
//! │  enqueue_update(target, patch)                                      │
//! │    ├── add still pending for target? merge patch INTO the add       │
//! │    └── else: merge into the single queued update for the target     │
//! │        (later patches win per field - never a second update row)    │
//! │                                                                     │
//! │  enqueue_delete(target)                                             │
//! │    ├── add still pending? drop the add (nothing ever reaches the    │
//! │    │   server), reverse its quantity effect                         │
//! │    └── else: drop any queued update, persist a delete keyed by      │
//! │        the server id                                                │
//! │                                                                     │
//! │  The quantity admission check is the ONE synchronous validation:    │
//! │  a mutation that would drive available quantity negative never      │
//! │  enters the queue.                                                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use tracing::debug;
use uuid::Uuid;

use tally_core::{
    apply_quantity_delta, EvictedMutation, MutationKind, Patch, QueuedAdd, QueuedDelete,
    QueuedUpdate, RecordRef, SyncRecord, ValidationError,
};

use crate::error::{StoreError, StoreResult};
use crate::pool::{Store, StoreTx};
use crate::tables::{table, Bucket};

/// Repository for the pending-mutation buckets of one record type.
#[derive(Debug, Clone)]
pub struct MutationQueue<R: SyncRecord> {
    store: Store,
    _marker: PhantomData<fn() -> R>,
}

impl<R: SyncRecord> MutationQueue<R> {
    pub fn new(store: Store) -> Self {
        MutationQueue {
            store,
            _marker: PhantomData,
        }
    }

    fn add_tbl() -> String {
        table(R::KIND, Bucket::OfflineAdd)
    }

    fn upd_tbl() -> String {
        table(R::KIND, Bucket::OfflineUpdate)
    }

    fn del_tbl() -> String {
        table(R::KIND, Bucket::OfflineDelete)
    }

    // =========================================================================
    // Enqueue (UI-facing)
    // =========================================================================

    /// Admits a locally created record to the queue.
    ///
    /// Assigns a fresh local id, validates the record, performs the quantity
    /// admission check, persists the add and rebuilds the affected overlay -
    /// all in one transaction. Returns the assigned local id.
    pub async fn enqueue_add(&self, mut record: R) -> StoreResult<String> {
        let local_id = Uuid::new_v4().to_string();
        record.set_local_id(local_id.clone());
        record.set_server_id(None);
        record.validate()?;

        let ledger = self.store.ledger();
        let mut tx = self.store.begin().await?;

        let affected = if let Some(effect) = record.quantity_effect() {
            let canonical = ledger.canonical_stock_in_tx(&mut tx, &effect.stock_in).await?;
            let available = ledger
                .available_tx(&mut tx, &canonical)
                .await?
                .ok_or_else(|| ValidationError::UnknownRecord {
                    id: effect.stock_in.clone(),
                })?;
            apply_quantity_delta(&canonical, available, effect.delta)?;
            Some(canonical)
        } else {
            None
        };

        let queued = QueuedAdd::new(record, Utc::now());
        tx.put_doc(&Self::add_tbl(), &local_id, &queued).await?;

        if let Some(canonical) = affected {
            ledger.rebuild_for_tx(&mut tx, &[canonical]).await?;
        }

        tx.commit().await?;

        debug!(entity = %R::KIND, local_id = %local_id, "Queued add");
        Ok(local_id)
    }

    /// Admits a local edit.
    ///
    /// Merges into the pending add when one exists for the target, otherwise
    /// merges into (or creates) the single queued update for that record.
    pub async fn enqueue_update(&self, target: RecordRef, patch: Patch) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let ledger = self.store.ledger();
        let mut tx = self.store.begin().await?;

        // Case 1: the record is still an unacknowledged add - fold the edit
        // into it so the server only ever sees the final shape.
        if let RecordRef::Local(local_id) = &target {
            let add_tbl = Self::add_tbl();
            if let Some(mut queued) = tx.get_doc::<QueuedAdd<R>>(&add_tbl, local_id).await? {
                let old_effect = queued.record.quantity_effect();
                let patched = patch.apply_to(&queued.record)?;
                patched.validate()?;
                let new_effect = patched.quantity_effect();

                self.check_effect_change(&mut tx, old_effect.as_ref(), new_effect.as_ref())
                    .await?;

                queued.record = patched;
                tx.put_doc(&add_tbl, local_id, &queued).await?;

                let affected = self
                    .affected_canonicals(&mut tx, old_effect.as_ref(), new_effect.as_ref())
                    .await?;
                ledger.rebuild_for_tx(&mut tx, &affected).await?;

                tx.commit().await?;
                debug!(entity = %R::KIND, local_id = %local_id, "Merged patch into pending add");
                return Ok(());
            }
        }

        // Case 2: the record is synced - one queued update per target,
        // later patches merged in.
        let key = self.canonical_target_key(&mut tx, &target).await?;
        let upd_tbl = Self::upd_tbl();

        let reconciled = tx
            .get_doc::<R>(&table(R::KIND, Bucket::All), &key)
            .await?
            .ok_or_else(|| ValidationError::UnknownRecord { id: key.clone() })?;

        let queued = match tx.get_doc::<QueuedUpdate>(&upd_tbl, &key).await? {
            Some(mut existing) => {
                existing.patch.merge(&patch);
                existing
            }
            None => QueuedUpdate::new(
                RecordRef::Server(key.clone()),
                patch,
                reconciled.version(),
                Utc::now(),
            ),
        };

        // Validate the record as it would look after the accumulated patch.
        let old_effect = reconciled.quantity_effect();
        let patched = queued.patch.apply_to(&reconciled)?;
        patched.validate()?;
        let new_effect = patched.quantity_effect();

        self.check_effect_change(&mut tx, old_effect.as_ref(), new_effect.as_ref())
            .await?;

        tx.put_doc(&upd_tbl, &key, &queued).await?;

        let affected = self
            .affected_canonicals(&mut tx, old_effect.as_ref(), new_effect.as_ref())
            .await?;
        ledger.rebuild_for_tx(&mut tx, &affected).await?;

        tx.commit().await?;
        debug!(entity = %R::KIND, key = %key, "Queued update");
        Ok(())
    }

    /// Admits a local delete.
    ///
    /// A still-pending add is simply dropped (the server never hears about
    /// it); a synced record gets a queued delete keyed by its server id.
    /// Either way the quantity effect is reversed.
    pub async fn enqueue_delete(&self, target: RecordRef) -> StoreResult<()> {
        let ledger = self.store.ledger();
        let mut tx = self.store.begin().await?;

        // Case 1: never synced - drop the add and we are done.
        if let RecordRef::Local(local_id) = &target {
            let add_tbl = Self::add_tbl();
            if let Some(queued) = tx.get_doc::<QueuedAdd<R>>(&add_tbl, local_id).await? {
                tx.delete(&add_tbl, local_id).await?;

                if let Some(effect) = queued.record.quantity_effect() {
                    let canonical =
                        ledger.canonical_stock_in_tx(&mut tx, &effect.stock_in).await?;
                    ledger.rebuild_for_tx(&mut tx, &[canonical]).await?;
                }

                tx.commit().await?;
                debug!(entity = %R::KIND, local_id = %local_id, "Dropped pending add on delete");
                return Ok(());
            }
        }

        // Case 2: synced - queue a delete, dropping any pending update
        // for the same record.
        let key = self.canonical_target_key(&mut tx, &target).await?;
        tx.delete(&Self::upd_tbl(), &key).await?;

        // Reversing a restore (deleting a sales return) consumes quantity
        // again, so the admission check applies here too.
        let reconciled = tx.get_doc::<R>(&table(R::KIND, Bucket::All), &key).await?;
        let affected = if let Some(effect) = reconciled.as_ref().and_then(|r| r.quantity_effect()) {
            let canonical = ledger.canonical_stock_in_tx(&mut tx, &effect.stock_in).await?;
            if let Some(available) = ledger.available_tx(&mut tx, &canonical).await? {
                apply_quantity_delta(&canonical, available, -effect.delta)?;
            }
            Some(canonical)
        } else {
            None
        };

        let queued = QueuedDelete::new(RecordRef::Server(key.clone()), Utc::now());
        tx.put_doc(&Self::del_tbl(), &key, &queued).await?;

        if let Some(canonical) = affected {
            ledger.rebuild_for_tx(&mut tx, &[canonical]).await?;
        }

        tx.commit().await?;
        debug!(entity = %R::KIND, key = %key, "Queued delete");
        Ok(())
    }

    // =========================================================================
    // Drain-side reads
    // =========================================================================

    /// All pending adds, oldest first.
    pub async fn adds(&self) -> StoreResult<Vec<QueuedAdd<R>>> {
        let mut rows: Vec<QueuedAdd<R>> = self
            .store
            .scan_docs(&Self::add_tbl())
            .await?
            .into_iter()
            .map(|(_, q)| q)
            .collect();
        rows.sort_by_key(|q| q.enqueued_at);
        Ok(rows)
    }

    /// All pending updates, oldest first.
    pub async fn updates(&self) -> StoreResult<Vec<QueuedUpdate>> {
        let mut rows: Vec<QueuedUpdate> = self
            .store
            .scan_docs(&Self::upd_tbl())
            .await?
            .into_iter()
            .map(|(_, q)| q)
            .collect();
        rows.sort_by_key(|q| q.enqueued_at);
        Ok(rows)
    }

    /// All pending deletes, oldest first.
    pub async fn deletes(&self) -> StoreResult<Vec<QueuedDelete>> {
        let mut rows: Vec<QueuedDelete> = self
            .store
            .scan_docs(&Self::del_tbl())
            .await?
            .into_iter()
            .map(|(_, q)| q)
            .collect();
        rows.sort_by_key(|q| q.enqueued_at);
        Ok(rows)
    }

    /// Total pending mutations across all three buckets.
    pub async fn pending_count(&self) -> StoreResult<i64> {
        let adds = self.store.count(&Self::add_tbl()).await?;
        let updates = self.store.count(&Self::upd_tbl()).await?;
        let deletes = self.store.count(&Self::del_tbl()).await?;
        Ok(adds + updates + deletes)
    }

    // =========================================================================
    // Orchestrator-facing row operations
    // =========================================================================

    /// Reads one pending add inside a transaction.
    pub async fn get_add_tx(
        &self,
        tx: &mut StoreTx,
        local_id: &str,
    ) -> StoreResult<Option<QueuedAdd<R>>> {
        tx.get_doc(&Self::add_tbl(), local_id).await
    }

    /// Overwrites one pending add (retry bookkeeping).
    pub async fn save_add(&self, queued: &QueuedAdd<R>) -> StoreResult<()> {
        self.store
            .put_doc(&Self::add_tbl(), queued.record.local_id(), queued)
            .await
    }

    /// Removes one pending add inside a transaction.
    pub async fn remove_add_tx(&self, tx: &mut StoreTx, local_id: &str) -> StoreResult<()> {
        tx.delete(&Self::add_tbl(), local_id).await
    }

    /// Overwrites one pending update (retry bookkeeping).
    pub async fn save_update(&self, queued: &QueuedUpdate) -> StoreResult<()> {
        self.store
            .put_doc(&Self::upd_tbl(), queued.target.key(), queued)
            .await
    }

    /// Removes one pending update inside a transaction.
    pub async fn remove_update_tx(&self, tx: &mut StoreTx, key: &str) -> StoreResult<()> {
        tx.delete(&Self::upd_tbl(), key).await
    }

    /// Overwrites one pending delete (retry bookkeeping).
    pub async fn save_delete(&self, queued: &QueuedDelete) -> StoreResult<()> {
        self.store
            .put_doc(&Self::del_tbl(), queued.target.key(), queued)
            .await
    }

    /// Removes one pending delete inside a transaction.
    pub async fn remove_delete_tx(&self, tx: &mut StoreTx, key: &str) -> StoreResult<()> {
        tx.delete(&Self::del_tbl(), key).await
    }

    /// Removes a mutation from whichever bucket holds it, rebuilding the
    /// overlays it touched. Used for evictions.
    pub async fn evict(&self, kind: MutationKind, key: &str) -> StoreResult<()> {
        let tbl = match kind {
            MutationKind::Add => Self::add_tbl(),
            MutationKind::Update => Self::upd_tbl(),
            MutationKind::Delete => Self::del_tbl(),
        };

        let ledger = self.store.ledger();
        let mut tx = self.store.begin().await?;
        tx.delete(&tbl, key).await?;
        ledger.rebuild_all_tx(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Evicts every mutation whose retry count has reached the cap.
    ///
    /// Normally the orchestrator evicts at failure time; this sweep catches
    /// entries left behind by crashes between passes.
    pub async fn evict_exhausted(&self, cap: u32) -> StoreResult<Vec<EvictedMutation>> {
        let ledger = self.store.ledger();
        let mut tx = self.store.begin().await?;
        let mut evicted = Vec::new();

        let add_tbl = Self::add_tbl();
        for (key, queued) in tx.scan_docs::<QueuedAdd<R>>(&add_tbl).await? {
            if queued.attempts.retry_count >= cap {
                tx.delete(&add_tbl, &key).await?;
                evicted.push(EvictedMutation {
                    entity: R::KIND,
                    kind: MutationKind::Add,
                    key,
                    last_error: queued.attempts.last_error,
                });
            }
        }

        let upd_tbl = Self::upd_tbl();
        for (key, queued) in tx.scan_docs::<QueuedUpdate>(&upd_tbl).await? {
            if queued.attempts.retry_count >= cap {
                tx.delete(&upd_tbl, &key).await?;
                evicted.push(EvictedMutation {
                    entity: R::KIND,
                    kind: MutationKind::Update,
                    key,
                    last_error: queued.attempts.last_error,
                });
            }
        }

        let del_tbl = Self::del_tbl();
        for (key, queued) in tx.scan_docs::<QueuedDelete>(&del_tbl).await? {
            if queued.attempts.retry_count >= cap {
                tx.delete(&del_tbl, &key).await?;
                evicted.push(EvictedMutation {
                    entity: R::KIND,
                    kind: MutationKind::Delete,
                    key,
                    last_error: queued.attempts.last_error,
                });
            }
        }

        if !evicted.is_empty() {
            ledger.rebuild_all_tx(&mut tx).await?;
        }

        tx.commit().await?;
        Ok(evicted)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Resolves an update/delete target to its canonical queue key (the
    /// server id). A local id with no mapping targets a record the server
    /// has never heard of.
    async fn canonical_target_key(
        &self,
        tx: &mut StoreTx,
        target: &RecordRef,
    ) -> StoreResult<String> {
        match target {
            RecordRef::Server(id) => Ok(id.clone()),
            RecordRef::Local(local_id) => self
                .store
                .mappings(R::KIND)
                .server_for_tx(tx, local_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Validation(ValidationError::UnknownRecord {
                        id: local_id.clone(),
                    })
                }),
        }
    }

    /// Admission check for a changed quantity effect: the incremental
    /// difference must not drive any affected stock-in negative.
    async fn check_effect_change(
        &self,
        tx: &mut StoreTx,
        old: Option<&tally_core::QuantityEffect>,
        new: Option<&tally_core::QuantityEffect>,
    ) -> StoreResult<()> {
        let ledger = self.store.ledger();

        let old_canonical = match old {
            Some(e) => Some((
                ledger.canonical_stock_in_tx(tx, &e.stock_in).await?,
                e.delta,
            )),
            None => None,
        };
        let new_canonical = match new {
            Some(e) => Some((
                ledger.canonical_stock_in_tx(tx, &e.stock_in).await?,
                e.delta,
            )),
            None => None,
        };

        match (old_canonical, new_canonical) {
            (Some((old_id, old_delta)), Some((new_id, new_delta))) if old_id == new_id => {
                // Same stock-in: only the difference is newly pending.
                let available = ledger
                    .available_tx(tx, &old_id)
                    .await?
                    .ok_or_else(|| ValidationError::UnknownRecord { id: old_id.clone() })?;
                apply_quantity_delta(&old_id, available, new_delta - old_delta)?;
            }
            (_, Some((new_id, new_delta))) => {
                // Removing the old effect only restores quantity; the new
                // stock-in must absorb the full new delta (the old effect is
                // not part of its balance).
                let available = ledger
                    .available_tx(tx, &new_id)
                    .await?
                    .ok_or_else(|| ValidationError::UnknownRecord { id: new_id.clone() })?;
                apply_quantity_delta(&new_id, available, new_delta)?;
            }
            (_, None) => {}
        }

        Ok(())
    }

    /// The deduplicated canonical ids touched by an effect change.
    async fn affected_canonicals(
        &self,
        tx: &mut StoreTx,
        old: Option<&tally_core::QuantityEffect>,
        new: Option<&tally_core::QuantityEffect>,
    ) -> StoreResult<Vec<String>> {
        let ledger = self.store.ledger();
        let mut ids = BTreeSet::new();
        if let Some(e) = old {
            ids.insert(ledger.canonical_stock_in_tx(tx, &e.stock_in).await?);
        }
        if let Some(e) = new {
            ids.insert(ledger.canonical_stock_in_tx(tx, &e.stock_in).await?);
        }
        Ok(ids.into_iter().collect())
    }
}
