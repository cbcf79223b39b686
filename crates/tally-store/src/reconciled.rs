//! # Reconciled Table Repository
//!
//! The `all` bucket: last server-confirmed state of one record type, keyed
//! by server id, plus the merged read view the UI consumes.
//!
//! ## Merged Read View
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    read path (merged view)                          │
//! │                                                                     │
//! │   {entity}_all ──────────────┐                                      │
//! │     − rows with a pending    │                                      │
//! │       delete                 ├──► patched, overlay-decorated rows   │
//! │     + pending update patch   │    + pending adds appended           │
//! │       applied                │                                      │
//! │   {entity}_offline_add ──────┘                                      │
//! │                                                                     │
//! │   The caller sees what the server WILL hold once the queue drains,  │
//! │   while the `all` bucket itself stays pure server truth.            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use tracing::warn;

use tally_core::{QueuedAdd, QueuedDelete, QueuedUpdate, SyncRecord};

use crate::error::{StoreError, StoreResult};
use crate::ledger::Overlay;
use crate::pool::{Store, StoreTx};
use crate::tables::{table, Bucket};

/// Repository for the reconciled (`all`) bucket of one record type.
#[derive(Debug, Clone)]
pub struct ReconciledTable<R: SyncRecord> {
    store: Store,
    _marker: PhantomData<fn() -> R>,
}

impl<R: SyncRecord> ReconciledTable<R> {
    pub fn new(store: Store) -> Self {
        ReconciledTable {
            store,
            _marker: PhantomData,
        }
    }

    fn tbl() -> String {
        table(R::KIND, Bucket::All)
    }

    /// Reads one reconciled record by server id.
    pub async fn get(&self, server_id: &str) -> StoreResult<Option<R>> {
        self.store.get_doc(&Self::tbl(), server_id).await
    }

    /// Reads one reconciled record inside a transaction.
    pub async fn get_tx(&self, tx: &mut StoreTx, server_id: &str) -> StoreResult<Option<R>> {
        tx.get_doc(&Self::tbl(), server_id).await
    }

    /// Writes one reconciled record inside a transaction. The record must
    /// carry its server id - reconciled rows are server truth.
    pub async fn put_tx(&self, tx: &mut StoreTx, record: &R) -> StoreResult<()> {
        let server_id = record
            .server_id()
            .ok_or_else(|| StoreError::Codec("reconciled record without server id".to_string()))?
            .to_string();
        tx.put_doc(&Self::tbl(), &server_id, record).await
    }

    /// Removes one reconciled record inside a transaction.
    pub async fn remove_tx(&self, tx: &mut StoreTx, server_id: &str) -> StoreResult<()> {
        tx.delete(&Self::tbl(), server_id).await
    }

    /// Every reconciled record.
    pub async fn list(&self) -> StoreResult<Vec<R>> {
        let rows: Vec<(String, R)> = self.store.scan_docs(&Self::tbl()).await?;
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    /// Number of reconciled records.
    pub async fn count(&self) -> StoreResult<i64> {
        self.store.count(&Self::tbl()).await
    }

    /// Replaces the whole table with a fresh server listing (last-writer-
    /// wins at collection granularity). Returns the new row count.
    pub async fn replace_all_tx(&self, tx: &mut StoreTx, records: &[R]) -> StoreResult<usize> {
        let tbl = Self::tbl();
        tx.clear(&tbl).await?;

        let mut written = 0;
        for record in records {
            // A listing row without a server id cannot be keyed; skip it
            // rather than poison the whole refresh.
            let Some(server_id) = record.server_id() else {
                warn!(entity = %R::KIND, "Server listing row without id, skipping");
                continue;
            };
            let server_id = server_id.to_string();
            tx.put_doc(&tbl, &server_id, record).await?;
            written += 1;
        }

        Ok(written)
    }

    /// Looks for a reconciled record that is a content duplicate of the
    /// given one: same fingerprint (referenced id, quantity, counterpart
    /// fields), stamped within the window. Guards against doubled UI
    /// submissions, not sync retries.
    pub async fn content_duplicate(
        &self,
        record: &R,
        window: chrono::Duration,
    ) -> StoreResult<Option<R>> {
        let fingerprint = record.content_fingerprint();
        let created_at = record.created_at();

        for candidate in self.list().await? {
            if candidate.content_fingerprint() != fingerprint {
                continue;
            }
            let age = created_at - candidate.created_at();
            if age.abs() <= window {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Merged view
    // =========================================================================

    /// The merged read view: reconciled rows minus pending deletes, pending
    /// update patches applied, overlay quantities decorated, pending adds
    /// appended (oldest first).
    pub async fn merged(&self) -> StoreResult<Vec<R>> {
        let mut tx = self.store.begin().await?;

        let reconciled: Vec<(String, R)> = tx.scan_docs(&Self::tbl()).await?;

        let mut adds: Vec<QueuedAdd<R>> = tx
            .scan_docs::<QueuedAdd<R>>(&table(R::KIND, Bucket::OfflineAdd))
            .await?
            .into_iter()
            .map(|(_, q)| q)
            .collect();
        adds.sort_by_key(|q| q.enqueued_at);

        let updates: HashMap<String, QueuedUpdate> = tx
            .scan_docs::<QueuedUpdate>(&table(R::KIND, Bucket::OfflineUpdate))
            .await?
            .into_iter()
            .collect();

        let deletes: HashSet<String> = tx
            .scan_docs::<QueuedDelete>(&table(R::KIND, Bucket::OfflineDelete))
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let overlays: HashMap<String, Overlay> = tx
            .scan_docs::<Overlay>(&table(R::KIND, Bucket::QtyOverlay))
            .await?
            .into_iter()
            .collect();

        tx.commit().await?;

        let mut view = Vec::with_capacity(reconciled.len() + adds.len());

        for (server_id, mut record) in reconciled {
            if deletes.contains(&server_id) {
                continue;
            }

            if let Some(update) = updates.get(&server_id) {
                match update.patch.apply_to(&record) {
                    Ok(patched) => record = patched,
                    Err(e) => {
                        warn!(entity = %R::KIND, key = %server_id, error = %e,
                            "Pending patch no longer applies, showing unpatched record");
                    }
                }
            }

            if let Some(overlay) = overlays.get(&server_id) {
                record.apply_overlay(overlay.available);
            }

            view.push(record);
        }

        for queued in adds {
            let mut record = queued.record;
            if let Some(overlay) = overlays.get(record.local_id()) {
                record.apply_overlay(overlay.available);
            }
            view.push(record);
        }

        Ok(view)
    }
}
