//! # tally-sync: Offline-First Sync Engine for Tally POS
//!
//! Lets point-of-sale operations (stock-outs, sales returns, stock-in
//! adjustments, backorders) be created and edited while disconnected, then
//! reconciled exactly once when connectivity resumes - without losing
//! updates, double-submitting transactions or corrupting running inventory
//! quantities.
//!
//! ## How a Mutation Travels
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Life of an Offline Sale                           │
//! │                                                                     │
//! │  UI: submit_create(stock_out)                                       │
//! │   │                                                                 │
//! │   ▼  synchronous admission (quantity check) - ONE transaction       │
//! │  offline_add row + offline-quantity overlay updated                 │
//! │   │                                                                 │
//! │   ▼  connectivity restored / foreground / manual "Sync"             │
//! │  EntityOrchestrator pass: adds → updates → deletes → fetch          │
//! │   │    • idempotency key + sync mapping = at-most-once              │
//! │   │    • content-duplicate window catches doubled submissions       │
//! │   │    • 5 transient failures → evicted and REPORTED, not silent    │
//! │   ▼                                                                 │
//! │  reconciled table = server truth, overlay cleared, mapping kept     │
//! │  until the server listing confirms the record                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Map
//!
//! - [`engine`] - the facade UI collaborators call
//! - [`orchestrator`] - per-entity drain passes and the reconciliation fetch
//! - [`gate`] - single-flight `Idle | Running` state with a waiter list
//! - [`monitor`] - connectivity events and the periodic cleanup sweep
//! - [`remote`] - the `RemoteApi` trait and its HTTP implementation
//! - [`retry`] - the one bounded-attempts eviction policy
//! - [`config`] - TOML + env configuration with validated defaults
//! - [`error`] - the engine's error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_store::{Store, StoreConfig};
//! use tally_sync::{ConnectivityEvent, SyncConfig, SyncEngine};
//!
//! let store = Store::new(StoreConfig::new("./tally.db")).await?;
//! let config = SyncConfig::load_or_default(None);
//! let engine = Arc::new(SyncEngine::with_http(store, config)?);
//!
//! // Wire platform connectivity into the monitor.
//! let monitor = engine.start_monitor();
//! monitor.notify(ConnectivityEvent::Online).await?;
//!
//! // Ring up a sale, offline or not.
//! let local_id = engine.stock_outs().submit_create(sale).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod monitor;
pub mod orchestrator;
pub mod remote;
pub mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{DeviceConfig, ServerSettings, SyncConfig, SyncSettings};
pub use engine::{EntityHandle, RemoteApis, SyncEngine, SyncStatus, SyncSummary};
pub use error::{SyncError, SyncResult};
pub use gate::SyncGate;
pub use monitor::{ConnectivityEvent, NetworkMonitor, NetworkMonitorHandle};
pub use orchestrator::{EntityOrchestrator, SyncReport};
pub use remote::{ApiError, HttpRemoteApi, RemoteApi};
pub use retry::{RetryDisposition, RetryPolicy};
