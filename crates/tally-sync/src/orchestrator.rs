//! # Sync Orchestrator
//!
//! Drains one entity kind's mutation queue against the remote API -
//! exactly once per logical mutation - then reconciles local state with a
//! whole-collection fetch.
//!
//! ## Pass Structure
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    One Sync Pass (per entity kind)                  │
//! │                                                                     │
//! │   Idle ──► Running(adds) ──► Running(updates) ──► Running(deletes)  │
//! │                                                        │            │
//! │                              Idle ◄── Running(fetch) ◄─┘            │
//! │                                                                     │
//! │  PER PENDING ADD:                                                   │
//! │   1. sync mapping exists?      → crash-after-success: drop, skip    │
//! │   2. content duplicate in all? → doubled UI submission: drop, skip  │
//! │   3. submit with idempotency key                                    │
//! │      • Conflict → server already holds it: drop, skip               │
//! │      • success  → ONE TRANSACTION: reconciled insert + sync         │
//! │                   mapping + queue delete + overlay rebuild          │
//! │      • transient→ bump retry counter; evict at the cap              │
//! │                                                                     │
//! │  FETCH: runs when a mutation pass made progress, or the last fetch  │
//! │  is stale. Replaces the whole reconciled table (collection-level    │
//! │  last-writer-wins), prunes dead mappings, rebuilds overlays.        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fixed adds → updates → deletes → fetch order is deliberate: it
//! avoids re-deriving dependency graphs between mutation kinds.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tally_core::{
    EntityKind, EvictedMutation, IdempotencyKey, MutationKind, QueuedAdd, SyncMapping, SyncRecord,
};
use tally_store::{last_fetch_key, last_sync_key, Store, META_TABLE};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::gate::SyncGate;
use crate::remote::{ApiError, RemoteApi};
use crate::retry::{RetryDisposition, RetryPolicy};

// =============================================================================
// Sync Report
// =============================================================================

/// Outcome of one sync pass over one entity kind.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// The entity kind this pass drained.
    pub entity: EntityKind,

    /// Mutations acknowledged by the server this pass.
    pub processed: usize,

    /// Mutations dropped because the server already held their effect
    /// (existing mapping, content duplicate, conflict, vanished target).
    pub skipped: usize,

    /// Mutations that failed transiently and stay queued.
    pub failed: usize,

    /// Mutations removed after exhausting the retry cap. Never silent:
    /// the caller must surface these as lost.
    pub evicted: Vec<EvictedMutation>,

    /// Whether a reconciliation fetch ran.
    pub fetched: bool,

    /// Error of a fetch that was due but failed (the pass itself still
    /// completes).
    pub fetch_error: Option<String>,
}

impl SyncReport {
    fn new(entity: EntityKind) -> Self {
        SyncReport {
            entity,
            processed: 0,
            skipped: 0,
            failed: 0,
            evicted: Vec::new(),
            fetched: false,
            fetch_error: None,
        }
    }

    /// True when this pass changed local or remote state.
    pub fn made_progress(&self) -> bool {
        self.processed > 0 || self.skipped > 0 || !self.evicted.is_empty()
    }
}

// =============================================================================
// Entity Orchestrator
// =============================================================================

/// Single-flight sync orchestrator for one entity kind.
pub struct EntityOrchestrator<R: SyncRecord> {
    store: Store,
    api: Arc<dyn RemoteApi<R>>,
    config: Arc<SyncConfig>,
    retry: RetryPolicy,
    gate: SyncGate<SyncReport>,

    /// Local ids currently being submitted. Guards against two orchestration
    /// paths racing on the same pending add within a pass.
    processing: Mutex<HashSet<String>>,
}

impl<R: SyncRecord> EntityOrchestrator<R> {
    pub fn new(store: Store, api: Arc<dyn RemoteApi<R>>, config: Arc<SyncConfig>) -> Self {
        let retry = RetryPolicy::new(config.max_retries());
        EntityOrchestrator {
            store,
            api,
            config,
            retry,
            gate: SyncGate::new(),
            processing: Mutex::new(HashSet::new()),
        }
    }

    /// True while a pass for this entity kind is in flight.
    pub async fn is_running(&self) -> bool {
        self.gate.is_running().await
    }

    /// Runs a sync pass, or joins the in-flight one.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.gate.run(|| self.run_pass()).await
    }

    /// Runs a fetch-only pass (or joins an in-flight pass), unconditionally
    /// refreshing the reconciled table from the server.
    ///
    /// The engine uses this to re-pull stock-ins after other entity kinds'
    /// passes changed server-side quantities.
    pub async fn refresh(&self) -> SyncResult<SyncReport> {
        self.gate
            .run(|| async {
                let mut report = SyncReport::new(R::KIND);
                match self.api.list_all().await {
                    Ok(listing) => {
                        self.apply_listing(listing).await?;
                        report.fetched = true;
                    }
                    Err(err) => {
                        warn!(entity = %R::KIND, error = %err, "Refresh fetch failed");
                        report.fetch_error = Some(err.to_string());
                    }
                }
                Ok(report)
            })
            .await
    }

    // =========================================================================
    // Pass Body
    // =========================================================================

    async fn run_pass(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::new(R::KIND);

        self.drain_adds(&mut report).await?;
        self.drain_updates(&mut report).await?;
        self.drain_deletes(&mut report).await?;
        self.maybe_fetch(&mut report).await?;

        self.store
            .put_doc(META_TABLE, &last_sync_key(R::KIND), &Utc::now())
            .await?;

        info!(
            entity = %R::KIND,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            evicted = report.evicted.len(),
            fetched = report.fetched,
            "Sync pass complete"
        );
        Ok(report)
    }

    // =========================================================================
    // Adds
    // =========================================================================

    async fn drain_adds(&self, report: &mut SyncReport) -> SyncResult<()> {
        let queue = self.store.queue::<R>();

        for queued in queue.adds().await? {
            let local_id = queued.record.local_id().to_string();

            {
                let mut processing = self.processing.lock().await;
                if !processing.insert(local_id.clone()) {
                    debug!(entity = %R::KIND, local_id = %local_id, "Add already in flight, skipping");
                    continue;
                }
            }

            let outcome = self.submit_add(queued, report).await;
            self.processing.lock().await.remove(&local_id);
            outcome?;
        }

        Ok(())
    }

    async fn submit_add(&self, queued: QueuedAdd<R>, report: &mut SyncReport) -> SyncResult<()> {
        let queue = self.store.queue::<R>();
        let mappings = self.store.mappings(R::KIND);
        let reconciled = self.store.reconciled::<R>();
        let local_id = queued.record.local_id().to_string();

        // 1. Crash-after-success-before-cleanup: the mapping proves the
        // server acknowledged this add in an earlier pass.
        if mappings.get(&local_id).await?.is_some() {
            debug!(entity = %R::KIND, local_id = %local_id,
                "Sync mapping already present, dropping duplicate add");
            self.drop_queued(MutationKind::Add, &local_id).await?;
            report.skipped += 1;
            return Ok(());
        }

        // 2. Content duplicate: the same sale rung up twice in the window.
        if let Some(duplicate) = reconciled
            .content_duplicate(&queued.record, self.config.duplicate_window())
            .await?
        {
            info!(entity = %R::KIND, local_id = %local_id,
                duplicate_of = ?duplicate.server_id(),
                "Content duplicate inside window, discarding add");
            self.drop_queued(MutationKind::Add, &local_id).await?;
            report.skipped += 1;
            return Ok(());
        }

        // 3. The referenced stock-in may have synced since this was queued;
        // the server only knows its server id.
        let mut record = queued.record.clone();
        if let Some(reference) = record.referenced_stock_in().map(str::to_string) {
            if let Some(server_id) = self
                .store
                .mappings(EntityKind::StockIn)
                .server_for(&reference)
                .await?
            {
                record.set_referenced_stock_in(server_id);
            }
        }

        // 4. Submit.
        match self.api.create(&record, &record.idempotency_key()).await {
            Ok(remote) => {
                let merged = R::reconcile(&record, remote);
                let Some(server_id) = merged.server_id().map(str::to_string) else {
                    return self
                        .register_add_failure(queued, "server response carried no id", report)
                        .await;
                };

                // The promotion is atomic: reconciled insert, sync mapping,
                // queue delete, overlay rebuild - all or nothing.
                let mut tx = self.store.begin().await?;
                reconciled.put_tx(&mut tx, &merged).await?;
                mappings
                    .put_tx(
                        &mut tx,
                        &SyncMapping {
                            local_id: local_id.clone(),
                            server_id: server_id.clone(),
                            synced_at: Utc::now(),
                        },
                    )
                    .await?;
                queue.remove_add_tx(&mut tx, &local_id).await?;
                self.store.ledger().rebuild_all_tx(&mut tx).await?;
                tx.commit().await?;

                debug!(entity = %R::KIND, local_id = %local_id, server_id = %server_id,
                    "Add acknowledged");
                report.processed += 1;
                Ok(())
            }

            Err(ApiError::Conflict) => {
                // The server already holds an equivalent record.
                info!(entity = %R::KIND, local_id = %local_id,
                    "Server reported conflict, treating add as already applied");
                self.drop_queued(MutationKind::Add, &local_id).await?;
                report.skipped += 1;
                Ok(())
            }

            Err(err) if err.is_retryable() => {
                self.register_add_failure(queued, &err.to_string(), report)
                    .await
            }

            Err(err) => {
                // Rejected outright; retrying the identical payload cannot
                // succeed.
                warn!(entity = %R::KIND, local_id = %local_id, error = %err,
                    "Add rejected by server, evicting");
                self.evict(MutationKind::Add, &local_id, &err.to_string(), report)
                    .await
            }
        }
    }

    async fn register_add_failure(
        &self,
        mut queued: QueuedAdd<R>,
        error: &str,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let local_id = queued.record.local_id().to_string();
        match self.retry.register_failure(&mut queued.attempts, error) {
            RetryDisposition::Retry => {
                debug!(entity = %R::KIND, local_id = %local_id,
                    attempt = queued.attempts.retry_count, error = %error,
                    "Add failed, will retry");
                self.store.queue::<R>().save_add(&queued).await?;
                report.failed += 1;
                Ok(())
            }
            RetryDisposition::Evict => self.evict(MutationKind::Add, &local_id, error, report).await,
        }
    }

    // =========================================================================
    // Updates
    // =========================================================================

    async fn drain_updates(&self, report: &mut SyncReport) -> SyncResult<()> {
        let queue = self.store.queue::<R>();
        let reconciled = self.store.reconciled::<R>();

        for mut queued in queue.updates().await? {
            let key = queued.target.key().to_string();
            let idem = IdempotencyKey::derive_for_target(R::KIND, "update", &key);

            match self
                .api
                .update(&key, &queued.patch, queued.base_version, &idem)
                .await
            {
                Ok(remote) => {
                    let mut tx = self.store.begin().await?;
                    let merged = match reconciled.get_tx(&mut tx, &key).await? {
                        Some(local) => R::reconcile(&local, remote),
                        None => remote,
                    };
                    reconciled.put_tx(&mut tx, &merged).await?;
                    queue.remove_update_tx(&mut tx, &key).await?;
                    self.store.ledger().rebuild_all_tx(&mut tx).await?;
                    tx.commit().await?;

                    debug!(entity = %R::KIND, key = %key, "Update acknowledged");
                    report.processed += 1;
                }

                Err(ApiError::Conflict) => {
                    info!(entity = %R::KIND, key = %key,
                        "Server already applied this update, dropping");
                    self.drop_queued(MutationKind::Update, &key).await?;
                    report.skipped += 1;
                }

                Err(ApiError::NotFound) => {
                    // The record vanished server-side; the patch has no
                    // target anymore. Mirror that locally.
                    info!(entity = %R::KIND, key = %key,
                        "Update target gone on server, dropping patch and local copy");
                    let mut tx = self.store.begin().await?;
                    queue.remove_update_tx(&mut tx, &key).await?;
                    reconciled.remove_tx(&mut tx, &key).await?;
                    self.store.ledger().rebuild_all_tx(&mut tx).await?;
                    tx.commit().await?;
                    report.skipped += 1;
                }

                Err(err) if err.is_retryable() => {
                    match self.retry.register_failure(&mut queued.attempts, err.to_string()) {
                        RetryDisposition::Retry => {
                            debug!(entity = %R::KIND, key = %key,
                                attempt = queued.attempts.retry_count,
                                "Update failed, will retry");
                            queue.save_update(&queued).await?;
                            report.failed += 1;
                        }
                        RetryDisposition::Evict => {
                            self.evict(MutationKind::Update, &key, &err.to_string(), report)
                                .await?;
                        }
                    }
                }

                Err(err) => {
                    warn!(entity = %R::KIND, key = %key, error = %err,
                        "Update rejected by server, evicting");
                    self.evict(MutationKind::Update, &key, &err.to_string(), report)
                        .await?;
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Deletes
    // =========================================================================

    async fn drain_deletes(&self, report: &mut SyncReport) -> SyncResult<()> {
        let queue = self.store.queue::<R>();
        let reconciled = self.store.reconciled::<R>();
        let mappings = self.store.mappings(R::KIND);

        for mut queued in queue.deletes().await? {
            let key = queued.target.key().to_string();
            let idem = IdempotencyKey::derive_for_target(R::KIND, "delete", &key);

            match self.api.delete(&key, &idem).await {
                // "Already gone" is exactly the state we wanted.
                Ok(()) | Err(ApiError::NotFound | ApiError::Conflict) => {
                    let mut tx = self.store.begin().await?;
                    reconciled.remove_tx(&mut tx, &key).await?;
                    queue.remove_delete_tx(&mut tx, &key).await?;
                    mappings.remove_by_server_tx(&mut tx, &key).await?;
                    self.store.ledger().rebuild_all_tx(&mut tx).await?;
                    tx.commit().await?;

                    debug!(entity = %R::KIND, key = %key, "Delete acknowledged");
                    report.processed += 1;
                }

                Err(err) if err.is_retryable() => {
                    match self.retry.register_failure(&mut queued.attempts, err.to_string()) {
                        RetryDisposition::Retry => {
                            debug!(entity = %R::KIND, key = %key,
                                attempt = queued.attempts.retry_count,
                                "Delete failed, will retry");
                            queue.save_delete(&queued).await?;
                            report.failed += 1;
                        }
                        RetryDisposition::Evict => {
                            self.evict(MutationKind::Delete, &key, &err.to_string(), report)
                                .await?;
                        }
                    }
                }

                Err(err) => {
                    warn!(entity = %R::KIND, key = %key, error = %err,
                        "Delete rejected by server, evicting");
                    self.evict(MutationKind::Delete, &key, &err.to_string(), report)
                        .await?;
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Reconciliation Fetch
    // =========================================================================

    async fn maybe_fetch(&self, report: &mut SyncReport) -> SyncResult<()> {
        let due = self.fetch_due().await?;
        if !report.made_progress() && !due {
            debug!(entity = %R::KIND, "No progress and fetch not due, skipping");
            return Ok(());
        }

        match self.api.list_all().await {
            Ok(listing) => {
                self.apply_listing(listing).await?;
                report.fetched = true;
            }
            Err(err) => {
                // The mutation passes stand on their own; a failed fetch
                // only delays reconciliation until the next trigger.
                warn!(entity = %R::KIND, error = %err, "Reconciliation fetch failed");
                report.fetch_error = Some(err.to_string());
            }
        }

        Ok(())
    }

    async fn fetch_due(&self) -> SyncResult<bool> {
        let last: Option<DateTime<Utc>> = self
            .store
            .get_doc(META_TABLE, &last_fetch_key(R::KIND))
            .await?;

        Ok(match last {
            None => true,
            Some(at) => Utc::now() - at > self.config.fetch_interval(),
        })
    }

    /// Replaces the reconciled table with the server listing, keeps local-id
    /// linkage alive through the mappings, prunes mappings whose server id
    /// vanished, and rebuilds every overlay.
    async fn apply_listing(&self, listing: Vec<R>) -> SyncResult<()> {
        let reconciled = self.store.reconciled::<R>();
        let mappings = self.store.mappings(R::KIND);

        // Pool reads before the transaction starts.
        let local_by_server: HashMap<String, String> = mappings
            .list()
            .await?
            .into_iter()
            .map(|m| (m.server_id, m.local_id))
            .collect();

        let mut tx = self.store.begin().await?;

        let mut prepared = Vec::with_capacity(listing.len());
        let mut live: HashSet<String> = HashSet::with_capacity(listing.len());

        for mut remote in listing {
            let Some(server_id) = remote.server_id().map(str::to_string) else {
                warn!(entity = %R::KIND, "Server listing row without id, skipping");
                continue;
            };
            live.insert(server_id.clone());

            let merged = match reconciled.get_tx(&mut tx, &server_id).await? {
                Some(local) => R::reconcile(&local, remote),
                None => {
                    if let Some(local_id) = local_by_server.get(&server_id) {
                        remote.set_local_id(local_id.clone());
                    }
                    remote
                }
            };
            prepared.push(merged);
        }

        let written = reconciled.replace_all_tx(&mut tx, &prepared).await?;
        let pruned = mappings.prune_tx(&mut tx, &live).await?;
        self.store.ledger().rebuild_all_tx(&mut tx).await?;
        tx.put_doc(META_TABLE, &last_fetch_key(R::KIND), &Utc::now())
            .await?;
        tx.commit().await?;

        debug!(entity = %R::KIND, records = written, pruned_mappings = pruned,
            "Reconciled table refreshed from server");
        Ok(())
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// Removes a queue entry whose effect the server already has.
    async fn drop_queued(&self, kind: MutationKind, key: &str) -> SyncResult<()> {
        self.store.queue::<R>().evict(kind, key).await?;
        Ok(())
    }

    /// Removes a queue entry as lost and records it in the report.
    async fn evict(
        &self,
        kind: MutationKind,
        key: &str,
        error: &str,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        warn!(entity = %R::KIND, mutation = %kind, key = %key, error = %error,
            "Mutation evicted after exhausting retries");
        self.store.queue::<R>().evict(kind, key).await?;
        report.evicted.push(EvictedMutation {
            entity: R::KIND,
            kind,
            key: key.to_string(),
            last_error: Some(error.to_string()),
        });
        Ok(())
    }
}
