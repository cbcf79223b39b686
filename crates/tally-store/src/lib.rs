//! # tally-store: Local Durable Store for Tally POS
//!
//! SQLite-backed persistence for the offline-first sync engine: every entity
//! table, every pending mutation and every derived overlay survives a
//! process restart, and multi-table writes are atomic.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Tally POS Data Flow                            │
//! │                                                                     │
//! │  tally-sync (orchestrator / engine facade)                          │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                  tally-store (THIS CRATE)                     │  │
//! │  │                                                               │  │
//! │  │   ┌────────────┐  ┌───────────────┐  ┌────────────────────┐   │  │
//! │  │   │   Store    │  │ Repositories  │  │    Migrations      │   │  │
//! │  │   │ (pool.rs)  │  │ queue.rs      │  │    (embedded)      │   │  │
//! │  │   │            │  │ reconciled.rs │  │                    │   │  │
//! │  │   │ SqlitePool │◄─│ mappings.rs   │  │ 001_store_schema   │   │  │
//! │  │   │ + StoreTx  │  │ ledger.rs     │  │                    │   │  │
//! │  │   └────────────┘  └───────────────┘  └────────────────────┘   │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  SQLite database (WAL), one file per terminal                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - connection pool, document-store contract, transactions
//! - [`tables`] - logical table naming (`{entity}_{bucket}`)
//! - [`queue`] - pending mutations with merge/admission semantics
//! - [`reconciled`] - server-truth tables and the merged read view
//! - [`mappings`] - local id ↔ server id sync mappings
//! - [`ledger`] - derived offline-quantity overlays
//! - [`migrations`] - embedded schema migrations
//! - [`error`] - store error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod mappings;
pub mod migrations;
pub mod pool;
pub mod queue;
pub mod reconciled;
pub mod tables;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use ledger::{Overlay, QuantityLedger};
pub use mappings::SyncMappings;
pub use pool::{Store, StoreConfig, StoreTx};
pub use queue::MutationQueue;
pub use reconciled::ReconciledTable;
pub use tables::{last_fetch_key, last_sync_key, table, Bucket, META_TABLE};
