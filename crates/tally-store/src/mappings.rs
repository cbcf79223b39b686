//! # Sync Mappings Repository
//!
//! The `synced_ids` bucket: local provisional id → server-assigned id.
//!
//! A mapping is written in the same transaction that promotes a queued add
//! into the reconciled table. Its existence is the at-most-once guard: an
//! add whose local id is already mapped was acknowledged in a previous pass
//! (possibly one that crashed before cleanup) and must not be re-submitted.

use std::collections::HashSet;

use tally_core::{EntityKind, SyncMapping};

use crate::error::StoreResult;
use crate::pool::{Store, StoreTx};
use crate::tables::{table, Bucket};

/// Repository for local-id ↔ server-id sync mappings of one entity kind.
#[derive(Debug, Clone)]
pub struct SyncMappings {
    store: Store,
    kind: EntityKind,
}

impl SyncMappings {
    pub fn new(store: Store, kind: EntityKind) -> Self {
        SyncMappings { store, kind }
    }

    fn tbl(&self) -> String {
        table(self.kind, Bucket::SyncedIds)
    }

    /// Looks up the mapping for a local id.
    pub async fn get(&self, local_id: &str) -> StoreResult<Option<SyncMapping>> {
        self.store.get_doc(&self.tbl(), local_id).await
    }

    /// Looks up the mapping for a local id inside a transaction.
    pub async fn get_tx(
        &self,
        tx: &mut StoreTx,
        local_id: &str,
    ) -> StoreResult<Option<SyncMapping>> {
        tx.get_doc(&self.tbl(), local_id).await
    }

    /// The server id a local id maps to, if synced.
    pub async fn server_for(&self, local_id: &str) -> StoreResult<Option<String>> {
        Ok(self.get(local_id).await?.map(|m| m.server_id))
    }

    /// Transactional variant of [`server_for`](Self::server_for).
    pub async fn server_for_tx(
        &self,
        tx: &mut StoreTx,
        local_id: &str,
    ) -> StoreResult<Option<String>> {
        Ok(self.get_tx(tx, local_id).await?.map(|m| m.server_id))
    }

    /// Reverse lookup: the local id that became a server id. Scans - the
    /// mapping table is small and short-lived.
    pub async fn local_for(&self, server_id: &str) -> StoreResult<Option<String>> {
        let rows: Vec<(String, SyncMapping)> = self.store.scan_docs(&self.tbl()).await?;
        Ok(rows
            .into_iter()
            .find(|(_, m)| m.server_id == server_id)
            .map(|(_, m)| m.local_id))
    }

    /// Writes a mapping (keyed by local id) inside a transaction.
    pub async fn put_tx(&self, tx: &mut StoreTx, mapping: &SyncMapping) -> StoreResult<()> {
        tx.put_doc(&self.tbl(), &mapping.local_id, mapping).await
    }

    /// Removes the mapping for a local id inside a transaction.
    pub async fn remove_tx(&self, tx: &mut StoreTx, local_id: &str) -> StoreResult<()> {
        tx.delete(&self.tbl(), local_id).await
    }

    /// Removes any mapping pointing at a server id inside a transaction
    /// (used when a delete is acknowledged).
    pub async fn remove_by_server_tx(&self, tx: &mut StoreTx, server_id: &str) -> StoreResult<()> {
        let tbl = self.tbl();
        let rows: Vec<(String, SyncMapping)> = tx.scan_docs(&tbl).await?;
        for (key, mapping) in rows {
            if mapping.server_id == server_id {
                tx.delete(&tbl, &key).await?;
            }
        }
        Ok(())
    }

    /// Prunes mappings whose server id no longer appears in the server
    /// listing. Returns the number of pruned rows.
    pub async fn prune_tx(
        &self,
        tx: &mut StoreTx,
        live_server_ids: &HashSet<String>,
    ) -> StoreResult<usize> {
        let tbl = self.tbl();
        let rows: Vec<(String, SyncMapping)> = tx.scan_docs(&tbl).await?;

        let mut pruned = 0;
        for (key, mapping) in rows {
            if !live_server_ids.contains(&mapping.server_id) {
                tx.delete(&tbl, &key).await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// All mappings for this entity kind.
    pub async fn list(&self) -> StoreResult<Vec<SyncMapping>> {
        let rows: Vec<(String, SyncMapping)> = self.store.scan_docs(&self.tbl()).await?;
        Ok(rows.into_iter().map(|(_, m)| m).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
