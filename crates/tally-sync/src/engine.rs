//! # Sync Engine Facade
//!
//! The interface UI collaborators see: local admission, merged reads,
//! manual sync, status.
//!
//! ## Surface
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        SyncEngine                                   │
//! │                                                                     │
//! │  engine.stock_outs().submit_create(record) → local id  (sync admit) │
//! │  engine.stock_outs().submit_update(target, patch)                   │
//! │  engine.stock_outs().submit_delete(target)                          │
//! │  engine.stock_outs().read_reconciled(|r| …)  → merged view          │
//! │                                                                     │
//! │  engine.trigger_sync()  → SyncSummary   (manual "Sync now" button)  │
//! │  engine.sync_status()   → { pending, last_sync, syncing, online }   │
//! │  engine.start_monitor() → NetworkMonitorHandle                      │
//! │                                                                     │
//! │  One typed handle per entity kind, in the same accessor style the   │
//! │  store exposes its repositories.                                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tally_core::{
    Backorder, EntityKind, EvictedMutation, Patch, RecordRef, SalesReturn, StockIn, StockOut,
    SyncRecord,
};
use tally_store::{last_sync_key, Store, META_TABLE};

use crate::config::{ServerSettings, SyncConfig};
use crate::error::SyncResult;
use crate::monitor::{NetworkMonitor, NetworkMonitorHandle};
use crate::orchestrator::{EntityOrchestrator, SyncReport};
use crate::remote::{HttpRemoteApi, RemoteApi};

// =============================================================================
// Status & Summary
// =============================================================================

/// Point-in-time engine status for the UI's sync indicator.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Pending mutations across every entity kind's queues.
    pub pending_count: i64,

    /// When the most recent sync pass completed (any entity kind).
    pub last_sync_at: Option<DateTime<Utc>>,

    /// True while any entity kind has a pass in flight.
    pub is_syncing: bool,

    /// Last connectivity state reported through the monitor.
    pub is_online: bool,
}

/// Aggregate result of a full sync over all entity kinds.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    /// One report per entity kind that completed a pass.
    pub reports: Vec<SyncReport>,

    /// Entity kinds whose pass failed outright (store/internal trouble).
    pub errors: Vec<(EntityKind, String)>,
}

impl SyncSummary {
    pub fn total_processed(&self) -> usize {
        self.reports.iter().map(|r| r.processed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.reports.iter().map(|r| r.skipped).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed).sum()
    }

    pub fn total_evicted(&self) -> usize {
        self.reports.iter().map(|r| r.evicted.len()).sum()
    }

    /// Every mutation lost to the retry cap during this sync.
    pub fn evicted(&self) -> impl Iterator<Item = &EvictedMutation> {
        self.reports.iter().flat_map(|r| r.evicted.iter())
    }
}

// =============================================================================
// Remote API bundle
// =============================================================================

/// The remote API client for each entity kind.
///
/// Production wires the HTTP implementation; tests plug in fixtures.
pub struct RemoteApis {
    pub stock_ins: Arc<dyn RemoteApi<StockIn>>,
    pub stock_outs: Arc<dyn RemoteApi<StockOut>>,
    pub sales_returns: Arc<dyn RemoteApi<SalesReturn>>,
    pub backorders: Arc<dyn RemoteApi<Backorder>>,
}

impl RemoteApis {
    /// HTTP clients for every kind, sharing one connection pool.
    pub fn http(settings: &ServerSettings) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(settings.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| crate::error::SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(RemoteApis {
            stock_ins: Arc::new(HttpRemoteApi::<StockIn>::with_client(
                client.clone(),
                &settings.base_url,
            )),
            stock_outs: Arc::new(HttpRemoteApi::<StockOut>::with_client(
                client.clone(),
                &settings.base_url,
            )),
            sales_returns: Arc::new(HttpRemoteApi::<SalesReturn>::with_client(
                client.clone(),
                &settings.base_url,
            )),
            backorders: Arc::new(HttpRemoteApi::<Backorder>::with_client(
                client,
                &settings.base_url,
            )),
        })
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// The offline-first sync engine.
pub struct SyncEngine {
    store: Store,
    config: Arc<SyncConfig>,
    online: AtomicBool,

    stock_ins: EntityOrchestrator<StockIn>,
    stock_outs: EntityOrchestrator<StockOut>,
    sales_returns: EntityOrchestrator<SalesReturn>,
    backorders: EntityOrchestrator<Backorder>,
}

impl SyncEngine {
    /// Creates the engine over a store and a remote API bundle.
    pub fn new(store: Store, apis: RemoteApis, config: SyncConfig) -> Self {
        let config = Arc::new(config);
        SyncEngine {
            stock_ins: EntityOrchestrator::new(store.clone(), apis.stock_ins, config.clone()),
            stock_outs: EntityOrchestrator::new(store.clone(), apis.stock_outs, config.clone()),
            sales_returns: EntityOrchestrator::new(
                store.clone(),
                apis.sales_returns,
                config.clone(),
            ),
            backorders: EntityOrchestrator::new(store.clone(), apis.backorders, config.clone()),
            store,
            config,
            online: AtomicBool::new(false),
        }
    }

    /// Creates the engine with HTTP clients built from the config's server
    /// settings.
    pub fn with_http(store: Store, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let apis = RemoteApis::http(&config.server)?;
        Ok(Self::new(store, apis, config))
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    // =========================================================================
    // Entity handles
    // =========================================================================

    pub fn stock_ins(&self) -> EntityHandle<'_, StockIn> {
        EntityHandle {
            store: &self.store,
            orchestrator: &self.stock_ins,
        }
    }

    pub fn stock_outs(&self) -> EntityHandle<'_, StockOut> {
        EntityHandle {
            store: &self.store,
            orchestrator: &self.stock_outs,
        }
    }

    pub fn sales_returns(&self) -> EntityHandle<'_, SalesReturn> {
        EntityHandle {
            store: &self.store,
            orchestrator: &self.sales_returns,
        }
    }

    pub fn backorders(&self) -> EntityHandle<'_, Backorder> {
        EntityHandle {
            store: &self.store,
            orchestrator: &self.backorders,
        }
    }

    // =========================================================================
    // Engine-wide operations
    // =========================================================================

    /// Syncs every entity kind, one at a time, each behind its single-flight
    /// gate; a concurrent caller joins the in-flight passes and receives the
    /// same reports.
    ///
    /// Stock-ins drain first so records queued against an offline-created
    /// stock-in can have their reference rewritten through its fresh
    /// mapping. If a quantity-affecting kind then makes progress, stock-ins
    /// are re-fetched so the server's adjusted quantities land in the same
    /// sync.
    pub async fn trigger_sync(&self) -> SyncSummary {
        let stock_ins = self.stock_ins.sync().await;
        let stock_outs = self.stock_outs.sync().await;
        let sales_returns = self.sales_returns.sync().await;
        let backorders = self.backorders.sync().await;

        let quantity_progress = matches!(&stock_outs, Ok(r) if r.made_progress())
            || matches!(&sales_returns, Ok(r) if r.made_progress());

        let mut summary = SyncSummary {
            reports: Vec::with_capacity(4),
            errors: Vec::new(),
        };

        for (kind, result) in [
            (EntityKind::StockIn, stock_ins),
            (EntityKind::StockOut, stock_outs),
            (EntityKind::SalesReturn, sales_returns),
            (EntityKind::Backorder, backorders),
        ] {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(e) => summary.errors.push((kind, e.to_string())),
            }
        }

        if quantity_progress {
            match self.stock_ins.refresh().await {
                Ok(refresh) => {
                    if let Some(report) = summary
                        .reports
                        .iter_mut()
                        .find(|r| r.entity == EntityKind::StockIn)
                    {
                        report.fetched |= refresh.fetched;
                        if report.fetch_error.is_none() {
                            report.fetch_error = refresh.fetch_error;
                        }
                    }
                }
                Err(e) => summary.errors.push((EntityKind::StockIn, e.to_string())),
            }
        }

        summary
    }

    /// Current engine status for the UI indicator.
    pub async fn sync_status(&self) -> SyncResult<SyncStatus> {
        let mut pending = 0;
        pending += self.store.queue::<StockIn>().pending_count().await?;
        pending += self.store.queue::<StockOut>().pending_count().await?;
        pending += self.store.queue::<SalesReturn>().pending_count().await?;
        pending += self.store.queue::<Backorder>().pending_count().await?;

        let mut last_sync_at: Option<DateTime<Utc>> = None;
        for kind in EntityKind::ALL {
            let at: Option<DateTime<Utc>> = self
                .store
                .get_doc(META_TABLE, &last_sync_key(kind))
                .await?;
            last_sync_at = match (last_sync_at, at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        let is_syncing = self.stock_ins.is_running().await
            || self.stock_outs.is_running().await
            || self.sales_returns.is_running().await
            || self.backorders.is_running().await;

        Ok(SyncStatus {
            pending_count: pending,
            last_sync_at,
            is_syncing,
            is_online: self.is_online(),
        })
    }

    /// Sweeps every queue for mutations stuck past the retry cap (periodic
    /// cleanup, also run once at monitor startup).
    pub async fn evict_exhausted(&self) -> SyncResult<Vec<EvictedMutation>> {
        let cap = self.config.max_retries();
        let mut evicted = Vec::new();
        evicted.extend(self.store.queue::<StockIn>().evict_exhausted(cap).await?);
        evicted.extend(self.store.queue::<StockOut>().evict_exhausted(cap).await?);
        evicted.extend(
            self.store
                .queue::<SalesReturn>()
                .evict_exhausted(cap)
                .await?,
        );
        evicted.extend(self.store.queue::<Backorder>().evict_exhausted(cap).await?);
        Ok(evicted)
    }

    /// The available quantity of a stock-in (overlay-aware), by either id.
    pub async fn available_quantity(&self, stock_in_id: &str) -> SyncResult<Option<i64>> {
        Ok(self.store.ledger().available(stock_in_id).await?)
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Records the connectivity state (driven by the network monitor).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Last known connectivity state.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Spawns the network monitor task for this engine and returns its
    /// handle. The host app feeds connectivity transitions into the handle.
    pub fn start_monitor(self: &Arc<Self>) -> NetworkMonitorHandle {
        let (monitor, handle) = NetworkMonitor::new(self.clone());
        tokio::spawn(monitor.run());
        handle
    }
}

// =============================================================================
// Entity Handle
// =============================================================================

/// Typed per-entity surface of the engine.
pub struct EntityHandle<'a, R: SyncRecord> {
    store: &'a Store,
    orchestrator: &'a EntityOrchestrator<R>,
}

impl<R: SyncRecord> EntityHandle<'_, R> {
    /// Admits a locally created record; returns its provisional local id.
    ///
    /// Synchronous local admission - the eventual sync is asynchronous.
    /// Fails only on validation (including the quantity check).
    pub async fn submit_create(&self, record: R) -> SyncResult<String> {
        Ok(self.store.queue::<R>().enqueue_add(record).await?)
    }

    /// Admits a local edit to a record.
    pub async fn submit_update(&self, target: RecordRef, patch: Patch) -> SyncResult<()> {
        Ok(self.store.queue::<R>().enqueue_update(target, patch).await?)
    }

    /// Admits a local delete of a record.
    pub async fn submit_delete(&self, target: RecordRef) -> SyncResult<()> {
        Ok(self.store.queue::<R>().enqueue_delete(target).await?)
    }

    /// The merged view (reconciled ∪ pending adds, patches applied, pending
    /// deletes excluded, overlays decorated), filtered.
    pub async fn read_reconciled<F>(&self, filter: F) -> SyncResult<Vec<R>>
    where
        F: Fn(&R) -> bool,
    {
        let view = self.store.reconciled::<R>().merged().await?;
        Ok(view.into_iter().filter(|r| filter(r)).collect())
    }

    /// Syncs this entity kind only (or joins its in-flight pass).
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.orchestrator.sync().await
    }

    /// Pending mutations queued for this entity kind.
    pub async fn pending_count(&self) -> SyncResult<i64> {
        Ok(self.store.queue::<R>().pending_count().await?)
    }
}
