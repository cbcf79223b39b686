//! # tally-core: Pure Domain Logic for Tally POS
//!
//! This crate is the **heart** of the Tally POS sync engine. It contains the
//! record types, mutation forms and business rules as pure functions with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Tally POS Architecture                         │
//! │                                                                     │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                 Host application (UI shell)                   │  │
//! │  │   submit_create / submit_update / submit_delete / status      │  │
//! │  └──────────────────────────────┬────────────────────────────────┘  │
//! │                                 │                                   │
//! │  ┌──────────────────────────────▼────────────────────────────────┐  │
//! │  │                 tally-sync (engine crate)                     │  │
//! │  │   orchestrator • reconciliation fetcher • network monitor     │  │
//! │  └──────────────────────────────┬────────────────────────────────┘  │
//! │                                 │                                   │
//! │  ┌──────────────────────────────▼────────────────────────────────┐  │
//! │  │                 tally-store (SQLite store)                    │  │
//! │  │   mutation queue • reconciled tables • ledger • mappings      │  │
//! │  └──────────────────────────────┬────────────────────────────────┘  │
//! │                                 │                                   │
//! │  ┌──────────────────────────────▼────────────────────────────────┐  │
//! │  │               ★ tally-core (THIS CRATE) ★                     │  │
//! │  │                                                               │  │
//! │  │   ┌─────────┐  ┌─────────┐  ┌──────────┐  ┌──────────────┐    │  │
//! │  │   │  types  │  │ record  │  │ mutation │  │ idempotency  │    │  │
//! │  │   │ StockIn │  │  trait  │  │  queued  │  │   v5 keys    │    │  │
//! │  │   │ StockOut│  │  Patch  │  │  forms   │  │              │    │  │
//! │  │   └─────────┘  └─────────┘  └──────────┘  └──────────────┘    │  │
//! │  │                                                               │  │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS          │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure functions**: deterministic, no side effects (`Utc::now()` only
//!    in constructors)
//! 2. **No I/O**: database, network and file system access are FORBIDDEN
//!    here
//! 3. **Integer money**: all monetary values are cents (i64), never floats
//! 4. **Explicit errors**: typed `ValidationError`, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod idempotency;
pub mod money;
pub mod mutation;
pub mod record;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{apply_quantity_delta, ValidationError, ValidationResult};
pub use idempotency::IdempotencyKey;
pub use money::Money;
pub use mutation::{
    EvictedMutation, MutationKind, QueuedAdd, QueuedDelete, QueuedUpdate, SyncAttempts,
    SyncMapping,
};
pub use record::{Patch, QuantityEffect, RecordRef, SyncRecord};
pub use types::{Backorder, EntityKind, SalesReturn, StockIn, StockOut};
