#![allow(dead_code)] // fixtures are shared across test binaries; not all use every helper

//! Shared test fixtures: an in-process mock of the authoritative server.
//!
//! The mock honors the same contract the HTTP client does - idempotency
//! keys, conflict on replay, 404 on missing targets - and additionally
//! applies the server-side inventory rules (a created stock-out decrements
//! its stock-in), so reconciliation fetches return realistic listings.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tally_core::{Backorder, IdempotencyKey, Patch, SalesReturn, StockIn, StockOut};
use tally_store::{Store, StoreConfig};
use tally_sync::{ApiError, RemoteApi, RemoteApis, SyncConfig, SyncEngine};

// =============================================================================
// Mock server
// =============================================================================

#[derive(Default)]
struct MockState {
    stock_ins: BTreeMap<String, StockIn>,
    stock_outs: BTreeMap<String, StockOut>,
    sales_returns: BTreeMap<String, SalesReturn>,
    backorders: BTreeMap<String, Backorder>,

    /// Idempotency keys already applied; a replay answers Conflict.
    seen_keys: HashSet<String>,

    next_id: u64,
    offline: bool,
    fail_next_creates: u32,

    create_calls: u32,
    list_calls: u32,
    delay_ms: u64,
}

impl MockState {
    fn alloc_id(&mut self) -> String {
        self.next_id += 1;
        format!("srv-{}", self.next_id)
    }
}

pub struct MockServer {
    state: Mutex<MockState>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(MockServer {
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn seed_stock_in(&self, server_id: &str, quantity: i64) {
        let mut record = StockIn::new("Beans", "BEAN-1", quantity, tally_core::Money::from_cents(500));
        record.server_id = Some(server_id.to_string());
        record.local_id = String::new();
        record.version = 1;
        self.state
            .lock()
            .unwrap()
            .stock_ins
            .insert(server_id.to_string(), record);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn fail_next_creates(&self, n: u32) {
        self.state.lock().unwrap().fail_next_creates = n;
    }

    pub fn set_delay_ms(&self, ms: u64) {
        self.state.lock().unwrap().delay_ms = ms;
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }

    pub fn stock_out_count(&self) -> usize {
        self.state.lock().unwrap().stock_outs.len()
    }

    pub fn stock_in_quantity(&self, server_id: &str) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .stock_ins
            .get(server_id)
            .map(|r| r.quantity)
    }

    pub fn stock_out_customer(&self, server_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .stock_outs
            .get(server_id)
            .map(|r| r.customer.clone())
    }

    /// Removes a stock-out behind the engine's back (for 404 scenarios).
    pub fn remove_stock_out(&self, server_id: &str) {
        self.state.lock().unwrap().stock_outs.remove(server_id);
    }
}

// =============================================================================
// Mock API client
// =============================================================================

#[derive(Clone)]
pub struct MockApi {
    pub server: Arc<MockServer>,
}

impl MockApi {
    /// Shared entry bookkeeping for create calls: offline/injected failures,
    /// idempotency replay detection, artificial latency.
    async fn admit_create(&self, key: &IdempotencyKey) -> Result<(), ApiError> {
        let delay = {
            let mut s = self.server.state.lock().unwrap();
            s.create_calls += 1;
            if s.offline {
                return Err(ApiError::Transient("server unreachable".into()));
            }
            if s.fail_next_creates > 0 {
                s.fail_next_creates -= 1;
                return Err(ApiError::Transient("injected failure".into()));
            }
            if !s.seen_keys.insert(key.to_string()) {
                return Err(ApiError::Conflict);
            }
            s.delay_ms
        };
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }

    async fn admit_read(&self) -> Result<u64, ApiError> {
        let (offline, delay) = {
            let mut s = self.server.state.lock().unwrap();
            s.list_calls += 1;
            (s.offline, s.delay_ms)
        };
        if offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        Ok(delay)
    }
}

#[async_trait]
impl RemoteApi<StockIn> for MockApi {
    async fn create(&self, record: &StockIn, key: &IdempotencyKey) -> Result<StockIn, ApiError> {
        self.admit_create(key).await?;
        let mut s = self.server.state.lock().unwrap();
        let id = s.alloc_id();
        let mut stored = record.clone();
        stored.server_id = Some(id.clone());
        stored.local_id = String::new();
        stored.version = 1;
        s.stock_ins.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        server_id: &str,
        patch: &Patch,
        _base_version: i64,
        _key: &IdempotencyKey,
    ) -> Result<StockIn, ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        let record = s.stock_ins.get(server_id).ok_or(ApiError::NotFound)?.clone();
        let mut patched = patch
            .apply_to(&record)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        patched.version = record.version + 1;
        s.stock_ins.insert(server_id.to_string(), patched.clone());
        Ok(patched)
    }

    async fn delete(&self, server_id: &str, _key: &IdempotencyKey) -> Result<(), ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        s.stock_ins
            .remove(server_id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }

    async fn list_all(&self) -> Result<Vec<StockIn>, ApiError> {
        let delay = self.admit_read().await?;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.server.state.lock().unwrap().stock_ins.values().cloned().collect())
    }
}

#[async_trait]
impl RemoteApi<StockOut> for MockApi {
    async fn create(&self, record: &StockOut, key: &IdempotencyKey) -> Result<StockOut, ApiError> {
        self.admit_create(key).await?;
        let mut s = self.server.state.lock().unwrap();
        let id = s.alloc_id();
        let mut stored = record.clone();
        stored.server_id = Some(id.clone());
        stored.local_id = String::new();
        stored.version = 1;
        // Server-side inventory rule: a sale consumes its stock-in.
        if let Some(si) = s.stock_ins.get_mut(&stored.stock_in_id) {
            si.quantity -= stored.quantity;
            si.version += 1;
        }
        s.stock_outs.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        server_id: &str,
        patch: &Patch,
        _base_version: i64,
        _key: &IdempotencyKey,
    ) -> Result<StockOut, ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        let record = s.stock_outs.get(server_id).ok_or(ApiError::NotFound)?.clone();
        let mut patched = patch
            .apply_to(&record)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        patched.version = record.version + 1;
        if let Some(si) = s.stock_ins.get_mut(&patched.stock_in_id) {
            si.quantity -= patched.quantity - record.quantity;
        }
        s.stock_outs.insert(server_id.to_string(), patched.clone());
        Ok(patched)
    }

    async fn delete(&self, server_id: &str, _key: &IdempotencyKey) -> Result<(), ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        let removed = s.stock_outs.remove(server_id).ok_or(ApiError::NotFound)?;
        if let Some(si) = s.stock_ins.get_mut(&removed.stock_in_id) {
            si.quantity += removed.quantity;
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StockOut>, ApiError> {
        let delay = self.admit_read().await?;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.server.state.lock().unwrap().stock_outs.values().cloned().collect())
    }
}

#[async_trait]
impl RemoteApi<SalesReturn> for MockApi {
    async fn create(
        &self,
        record: &SalesReturn,
        key: &IdempotencyKey,
    ) -> Result<SalesReturn, ApiError> {
        self.admit_create(key).await?;
        let mut s = self.server.state.lock().unwrap();
        let id = s.alloc_id();
        let mut stored = record.clone();
        stored.server_id = Some(id.clone());
        stored.local_id = String::new();
        stored.version = 1;
        if let Some(si) = s.stock_ins.get_mut(&stored.stock_in_id) {
            si.quantity += stored.quantity;
            si.version += 1;
        }
        s.sales_returns.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        server_id: &str,
        patch: &Patch,
        _base_version: i64,
        _key: &IdempotencyKey,
    ) -> Result<SalesReturn, ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        let record = s
            .sales_returns
            .get(server_id)
            .ok_or(ApiError::NotFound)?
            .clone();
        let mut patched = patch
            .apply_to(&record)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        patched.version = record.version + 1;
        s.sales_returns.insert(server_id.to_string(), patched.clone());
        Ok(patched)
    }

    async fn delete(&self, server_id: &str, _key: &IdempotencyKey) -> Result<(), ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        s.sales_returns
            .remove(server_id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }

    async fn list_all(&self) -> Result<Vec<SalesReturn>, ApiError> {
        let delay = self.admit_read().await?;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self
            .server
            .state
            .lock()
            .unwrap()
            .sales_returns
            .values()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RemoteApi<Backorder> for MockApi {
    async fn create(&self, record: &Backorder, key: &IdempotencyKey) -> Result<Backorder, ApiError> {
        self.admit_create(key).await?;
        let mut s = self.server.state.lock().unwrap();
        let id = s.alloc_id();
        let mut stored = record.clone();
        stored.server_id = Some(id.clone());
        stored.local_id = String::new();
        stored.version = 1;
        s.backorders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        server_id: &str,
        patch: &Patch,
        _base_version: i64,
        _key: &IdempotencyKey,
    ) -> Result<Backorder, ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        let record = s.backorders.get(server_id).ok_or(ApiError::NotFound)?.clone();
        let mut patched = patch
            .apply_to(&record)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        patched.version = record.version + 1;
        s.backorders.insert(server_id.to_string(), patched.clone());
        Ok(patched)
    }

    async fn delete(&self, server_id: &str, _key: &IdempotencyKey) -> Result<(), ApiError> {
        let mut s = self.server.state.lock().unwrap();
        if s.offline {
            return Err(ApiError::Transient("server unreachable".into()));
        }
        s.backorders
            .remove(server_id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }

    async fn list_all(&self) -> Result<Vec<Backorder>, ApiError> {
        let delay = self.admit_read().await?;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self
            .server
            .state
            .lock()
            .unwrap()
            .backorders
            .values()
            .cloned()
            .collect())
    }
}

// =============================================================================
// Engine fixture
// =============================================================================

pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// An engine over an in-memory store wired to the mock server.
pub async fn engine_with(server: &Arc<MockServer>) -> Arc<SyncEngine> {
    init_logs();

    let store = Store::new(StoreConfig::in_memory()).await.unwrap();
    let api = MockApi {
        server: server.clone(),
    };
    let apis = RemoteApis {
        stock_ins: Arc::new(api.clone()),
        stock_outs: Arc::new(api.clone()),
        sales_returns: Arc::new(api.clone()),
        backorders: Arc::new(api),
    };
    let config = SyncConfig::default();
    Arc::new(SyncEngine::new(store, apis, config))
}

/// Convenience: the record type's standard sale fixture.
pub fn sale(stock_in_id: &str, quantity: i64, customer: &str) -> StockOut {
    StockOut::new(
        stock_in_id,
        quantity,
        tally_core::Money::from_cents(1200),
        customer,
    )
}
