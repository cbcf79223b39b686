//! # Store Pool Management
//!
//! Connection pool creation and the document-store contract.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Local Durable Store                            │
//! │                                                                     │
//! │  StoreConfig::new(path) ← configure pool settings                   │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  Store::new(config).await ← create pool + run migrations            │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  ┌──────────────────────────────────────────┐                       │
//! │  │            SqlitePool (WAL)              │                       │
//! │  │  store_rows(tbl, key, value) - one       │                       │
//! │  │  physical table, many logical tables     │                       │
//! │  └──────────────────────────────────────────┘                       │
//! │       │                                                             │
//! │       ├── get / put / delete / scan  (autocommit)                   │
//! │       └── begin() → StoreTx          (atomic multi-table writes)    │
//! │                                                                     │
//! │  CRASH CONTRACT: a transaction that did not commit leaves no        │
//! │  observable writes after restart (SQLite journaling).               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL (Write-Ahead Logging) mode is enabled for:
//! - Better concurrent read performance
//! - Readers don't block writers, writers don't block readers
//! - Better crash recovery

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use tally_core::{EntityKind, SyncRecord};

use crate::error::{StoreError, StoreResult};
use crate::ledger::QuantityLedger;
use crate::mappings::SyncMappings;
use crate::migrations;
use crate::queue::MutationQueue;
use crate::reconciled::ReconciledTable;

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = StoreConfig::new("/path/to/tally.db").max_connections(5);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5 (sufficient for a local POS app)
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps connections
    /// alive indefinitely (required for in-memory databases).
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on connect.
    pub run_migrations: bool,
}

impl StoreConfig {
    /// Creates a new configuration with the given database path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Creates an in-memory store configuration (for testing).
    ///
    /// A single connection that never idles out: the in-memory database
    /// lives exactly as long as its connection does.
    pub fn in_memory() -> Self {
        StoreConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Main store handle: the document-store contract plus typed repository
/// accessors.
///
/// ## Usage
/// ```rust,ignore
/// let store = Store::new(StoreConfig::new("./tally.db")).await?;
/// let queue = store.queue::<StockOut>();
/// let local_id = queue.enqueue_add(record).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Creates the store: opens (or creates) the database file, configures
    /// SQLite for a local POS workload (WAL, NORMAL sync, foreign keys) and
    /// runs migrations.
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Opening local store"
        );

        // sqlite://path?mode=rwc creates the file if it does not exist
        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!(
            max_connections = config.max_connections,
            "Store pool created"
        );

        let store = Store { pool };

        if config.run_migrations {
            migrations::run_migrations(&store.pool).await?;
        }

        Ok(store)
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if the store is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Closes the connection pool. All operations fail afterwards.
    pub async fn close(&self) {
        info!("Closing store pool");
        self.pool.close().await;
    }

    // =========================================================================
    // Repository Accessors
    // =========================================================================

    /// The mutation queue for a record type.
    pub fn queue<R: SyncRecord>(&self) -> MutationQueue<R> {
        MutationQueue::new(self.clone())
    }

    /// The reconciled table for a record type.
    pub fn reconciled<R: SyncRecord>(&self) -> ReconciledTable<R> {
        ReconciledTable::new(self.clone())
    }

    /// The sync mappings for an entity kind.
    pub fn mappings(&self, kind: EntityKind) -> SyncMappings {
        SyncMappings::new(self.clone(), kind)
    }

    /// The quantity ledger (cross-entity, stock-in overlays).
    pub fn ledger(&self) -> QuantityLedger {
        QuantityLedger::new(self.clone())
    }

    // =========================================================================
    // Document-Store Contract (autocommit)
    // =========================================================================

    /// Reads one raw value.
    pub async fn get(&self, tbl: &str, key: &str) -> StoreResult<Option<String>> {
        fetch_raw(&self.pool, tbl, key).await
    }

    /// Writes (inserts or replaces) one raw value.
    pub async fn put(&self, tbl: &str, key: &str, value: &str) -> StoreResult<()> {
        put_raw(&self.pool, tbl, key, value).await
    }

    /// Deletes one row. Deleting a missing row is not an error.
    pub async fn delete(&self, tbl: &str, key: &str) -> StoreResult<()> {
        delete_raw(&self.pool, tbl, key).await
    }

    /// Scans a whole logical table, ordered by key.
    pub async fn scan(&self, tbl: &str) -> StoreResult<Vec<(String, String)>> {
        scan_raw(&self.pool, tbl).await
    }

    /// Counts the rows of a logical table.
    pub async fn count(&self, tbl: &str) -> StoreResult<i64> {
        count_raw(&self.pool, tbl).await
    }

    /// Reads one JSON document.
    pub async fn get_doc<T: DeserializeOwned>(
        &self,
        tbl: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        match self.get(tbl, key).await? {
            Some(raw) => {
                let doc =
                    serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(tbl, key, e))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Writes one JSON document.
    pub async fn put_doc<T: Serialize>(&self, tbl: &str, key: &str, doc: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(doc)?;
        self.put(tbl, key, &raw).await
    }

    /// Scans a logical table as JSON documents.
    pub async fn scan_docs<T: DeserializeOwned>(
        &self,
        tbl: &str,
    ) -> StoreResult<Vec<(String, T)>> {
        let rows = self.scan(tbl).await?;
        rows.into_iter()
            .map(|(key, raw)| {
                let doc =
                    serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(tbl, &key, e))?;
                Ok((key, doc))
            })
            .collect()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begins a transaction. Writes through the returned [`StoreTx`] become
    /// visible atomically on `commit`; dropping it rolls everything back.
    pub async fn begin(&self) -> StoreResult<StoreTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(StoreTx { tx })
    }
}

// =============================================================================
// Store Transaction
// =============================================================================

/// A transaction over the document store.
///
/// All-or-nothing: every `put`/`delete` issued through this handle is
/// observable after `commit()` or not at all - including across a process
/// crash mid-write.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTx {
    /// Commits the transaction.
    pub async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }

    /// Reads one raw value inside the transaction.
    pub async fn get(&mut self, tbl: &str, key: &str) -> StoreResult<Option<String>> {
        fetch_raw(&mut *self.tx, tbl, key).await
    }

    /// Writes one raw value inside the transaction.
    pub async fn put(&mut self, tbl: &str, key: &str, value: &str) -> StoreResult<()> {
        put_raw(&mut *self.tx, tbl, key, value).await
    }

    /// Deletes one row inside the transaction.
    pub async fn delete(&mut self, tbl: &str, key: &str) -> StoreResult<()> {
        delete_raw(&mut *self.tx, tbl, key).await
    }

    /// Scans a logical table inside the transaction.
    pub async fn scan(&mut self, tbl: &str) -> StoreResult<Vec<(String, String)>> {
        scan_raw(&mut *self.tx, tbl).await
    }

    /// Deletes every row of a logical table inside the transaction.
    pub async fn clear(&mut self, tbl: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM store_rows WHERE tbl = ?1")
            .bind(tbl)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Reads one JSON document inside the transaction.
    pub async fn get_doc<T: DeserializeOwned>(
        &mut self,
        tbl: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        match self.get(tbl, key).await? {
            Some(raw) => {
                let doc =
                    serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(tbl, key, e))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Writes one JSON document inside the transaction.
    pub async fn put_doc<T: Serialize>(&mut self, tbl: &str, key: &str, doc: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(doc)?;
        self.put(tbl, key, &raw).await
    }

    /// Scans a logical table as JSON documents inside the transaction.
    pub async fn scan_docs<T: DeserializeOwned>(
        &mut self,
        tbl: &str,
    ) -> StoreResult<Vec<(String, T)>> {
        let rows = self.scan(tbl).await?;
        rows.into_iter()
            .map(|(key, raw)| {
                let doc =
                    serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(tbl, &key, e))?;
                Ok((key, doc))
            })
            .collect()
    }
}

// =============================================================================
// Raw SQL (shared between pool and transaction executors)
// =============================================================================

async fn fetch_raw<'e, E>(executor: E, tbl: &str, key: &str) -> StoreResult<Option<String>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT value FROM store_rows WHERE tbl = ?1 AND key = ?2")
        .bind(tbl)
        .bind(key)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|r| r.get::<String, _>(0)))
}

async fn put_raw<'e, E>(executor: E, tbl: &str, key: &str, value: &str) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO store_rows (tbl, key, value)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (tbl, key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(tbl)
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;

    Ok(())
}

async fn delete_raw<'e, E>(executor: E, tbl: &str, key: &str) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM store_rows WHERE tbl = ?1 AND key = ?2")
        .bind(tbl)
        .bind(key)
        .execute(executor)
        .await?;

    Ok(())
}

async fn scan_raw<'e, E>(executor: E, tbl: &str) -> StoreResult<Vec<(String, String)>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT key, value FROM store_rows WHERE tbl = ?1 ORDER BY key")
        .bind(tbl)
        .fetch_all(executor)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
        .collect())
}

async fn count_raw<'e, E>(executor: E, tbl: &str) -> StoreResult<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM store_rows WHERE tbl = ?1")
        .bind(tbl)
        .fetch_one(executor)
        .await?;

    Ok(count)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = Store::new(StoreConfig::in_memory()).await.unwrap();
        assert!(store.health_check().await);
    }

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let store = Store::new(StoreConfig::in_memory()).await.unwrap();

        store.put("stockins_all", "a", "{\"x\":1}").await.unwrap();
        assert_eq!(
            store.get("stockins_all", "a").await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );

        // Same key in a different logical table is a different row.
        assert!(store.get("stockouts_all", "a").await.unwrap().is_none());

        store.delete("stockins_all", "a").await.unwrap();
        assert!(store.get("stockins_all", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_tx_rolls_back() {
        let store = Store::new(StoreConfig::in_memory()).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.put("stockins_all", "a", "1").await.unwrap();
            // Dropped without commit.
        }

        assert!(store.get("stockins_all", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_committed_tx_visible() {
        let store = Store::new(StoreConfig::in_memory()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.put("stockins_all", "a", "1").await.unwrap();
        tx.put("stockins_synced_ids", "l", "s").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.count("stockins_all").await.unwrap(), 1);
        assert_eq!(store.count("stockins_synced_ids").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_is_key_ordered() {
        let store = Store::new(StoreConfig::in_memory()).await.unwrap();
        store.put("t", "b", "2").await.unwrap();
        store.put("t", "a", "1").await.unwrap();

        let rows = store.scan("t").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "a");
        assert_eq!(rows[1].0, "b");
    }
}
