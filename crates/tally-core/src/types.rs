//! # Domain Types
//!
//! The four record types the sync engine manages, plus the entity-kind
//! discriminant that fixes their table names and API paths.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                │
//! │                                                                     │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐            │
//! │  │   StockIn     │  │   StockOut    │  │  SalesReturn  │            │
//! │  │ ───────────── │  │ ───────────── │  │ ───────────── │            │
//! │  │ quantity      │◄─│ stock_in_id   │  │ stock_in_id   │──┐         │
//! │  │ offline qty   │  │ quantity (−)  │  │ quantity (+)  │  │         │
//! │  │ unit_cost     │  │ rate, customer│  │ customer      │  │         │
//! │  └───────▲───────┘  └───────────────┘  └───────────────┘  │         │
//! │          └────────────────────────────────────────────────┘         │
//! │                                                                     │
//! │  ┌───────────────┐                                                  │
//! │  │   Backorder   │   No quantity effect: records unmet demand.      │
//! │  └───────────────┘                                                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every record has:
//! - `local_id`: UUID v4 assigned at enqueue time, never sent back by the
//!   server
//! - `server_id`: authoritative id, absent until the first successful sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::money::Money;
use crate::record::{QuantityEffect, SyncRecord};

// =============================================================================
// Entity Kind
// =============================================================================

/// Discriminant for the record types the engine syncs.
///
/// Each kind gets its own set of logical store tables and its own remote API
/// collection; kinds sync independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Inventory received into stock. Quantity-bearing.
    StockIn,
    /// A sale line consuming stock-in quantity.
    StockOut,
    /// A return restoring stock-in quantity.
    SalesReturn,
    /// A customer order for stock that is not available.
    Backorder,
}

impl EntityKind {
    /// Every kind, in the order passes run during a full sync.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::StockIn,
        EntityKind::StockOut,
        EntityKind::SalesReturn,
        EntityKind::Backorder,
    ];

    /// Prefix for this kind's logical store tables (`stockins_all`,
    /// `stockins_offline_add`, ...).
    pub fn table_prefix(&self) -> &'static str {
        match self {
            EntityKind::StockIn => "stockins",
            EntityKind::StockOut => "stockouts",
            EntityKind::SalesReturn => "salesreturns",
            EntityKind::Backorder => "backorders",
        }
    }

    /// Path segment of this kind's remote API collection.
    pub fn api_path(&self) -> &'static str {
        match self {
            EntityKind::StockIn => "stock-ins",
            EntityKind::StockOut => "stock-outs",
            EntityKind::SalesReturn => "sales-returns",
            EntityKind::Backorder => "backorders",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::StockIn => write!(f, "stock_in"),
            EntityKind::StockOut => write!(f, "stock_out"),
            EntityKind::SalesReturn => write!(f, "sales_return"),
            EntityKind::Backorder => write!(f, "backorder"),
        }
    }
}

// =============================================================================
// Stock In
// =============================================================================

/// Inventory received into stock. The quantity-bearing record.
///
/// `quantity` is the last server-confirmed value and is only ever replaced
/// by a successful sync pass. `offline_quantity` is the derived overlay the
/// quantity ledger maintains: present exactly while pending local mutations
/// touch this stock-in, always preferred for display and admission checks,
/// and never sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockIn {
    /// Client-assigned provisional id (absent in server payloads).
    #[serde(default)]
    pub local_id: String,

    /// Server-assigned id, absent until synced.
    #[serde(default)]
    pub server_id: Option<String>,

    /// Display name of the product received.
    pub product_name: String,

    /// Stock keeping unit.
    pub sku: String,

    /// Server-confirmed quantity on hand.
    pub quantity: i64,

    /// Derived overlay: `quantity` adjusted by the net effect of every
    /// locally-queued, not-yet-acknowledged mutation. Local only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_quantity: Option<i64>,

    /// Cost per unit.
    pub unit_cost: Money,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Server-maintained version counter.
    #[serde(default)]
    pub version: i64,
}

impl StockIn {
    /// Creates a new stock-in record awaiting enqueue.
    pub fn new(
        product_name: impl Into<String>,
        sku: impl Into<String>,
        quantity: i64,
        unit_cost: Money,
    ) -> Self {
        let now = Utc::now();
        StockIn {
            local_id: String::new(),
            server_id: None,
            product_name: product_name.into(),
            sku: sku.into(),
            quantity,
            offline_quantity: None,
            unit_cost,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// The quantity available for new mutations: the overlay when present,
    /// the server-confirmed quantity otherwise.
    pub fn available_quantity(&self) -> i64 {
        self.offline_quantity.unwrap_or(self.quantity)
    }
}

impl SyncRecord for StockIn {
    const KIND: EntityKind = EntityKind::StockIn;

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn set_local_id(&mut self, id: String) {
        self.local_id = id;
    }

    fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    fn set_server_id(&mut self, id: Option<String>) {
        self.server_id = id;
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn content_fingerprint(&self) -> String {
        format!("{}|{}|{}", self.sku, self.quantity, self.unit_cost.cents())
    }

    fn apply_overlay(&mut self, available: i64) {
        self.offline_quantity = Some(available);
    }

    fn validate(&self) -> ValidationResult<()> {
        if self.product_name.trim().is_empty() {
            return Err(ValidationError::required("product_name"));
        }
        if self.sku.trim().is_empty() {
            return Err(ValidationError::required("sku"));
        }
        if self.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }
        if self.unit_cost.is_negative() {
            return Err(ValidationError::MustBePositive {
                field: "unit_cost".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Stock Out
// =============================================================================

/// A sale line: consumes quantity from the referenced stock-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockOut {
    #[serde(default)]
    pub local_id: String,

    #[serde(default)]
    pub server_id: Option<String>,

    /// The stock-in this sale consumes from (local or server id).
    pub stock_in_id: String,

    /// Units sold. Always positive; the ledger applies it as a negative
    /// delta.
    pub quantity: i64,

    /// Sale price per unit.
    pub rate: Money,

    /// Customer the sale was made to.
    pub customer: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: i64,
}

impl StockOut {
    /// Creates a new stock-out record awaiting enqueue.
    pub fn new(
        stock_in_id: impl Into<String>,
        quantity: i64,
        rate: Money,
        customer: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        StockOut {
            local_id: String::new(),
            server_id: None,
            stock_in_id: stock_in_id.into(),
            quantity,
            rate,
            customer: customer.into(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Line total (`rate × quantity`), `None` on overflow.
    pub fn total(&self) -> Option<Money> {
        self.rate.checked_mul(self.quantity)
    }
}

impl SyncRecord for StockOut {
    const KIND: EntityKind = EntityKind::StockOut;

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn set_local_id(&mut self, id: String) {
        self.local_id = id;
    }

    fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    fn set_server_id(&mut self, id: Option<String>) {
        self.server_id = id;
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn quantity_effect(&self) -> Option<QuantityEffect> {
        Some(QuantityEffect::consume(&self.stock_in_id, self.quantity))
    }

    fn referenced_stock_in(&self) -> Option<&str> {
        Some(&self.stock_in_id)
    }

    fn set_referenced_stock_in(&mut self, id: String) {
        self.stock_in_id = id;
    }

    fn content_fingerprint(&self) -> String {
        format!("{}|{}|{}", self.stock_in_id, self.quantity, self.customer)
    }

    fn validate(&self) -> ValidationResult<()> {
        if self.stock_in_id.trim().is_empty() {
            return Err(ValidationError::required("stock_in_id"));
        }
        if self.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }
        if self.rate.is_negative() {
            return Err(ValidationError::MustBePositive {
                field: "rate".to_string(),
            });
        }
        if self.customer.trim().is_empty() {
            return Err(ValidationError::required("customer"));
        }
        Ok(())
    }
}

// =============================================================================
// Sales Return
// =============================================================================

/// A return against an earlier sale: restores quantity to the stock-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesReturn {
    #[serde(default)]
    pub local_id: String,

    #[serde(default)]
    pub server_id: Option<String>,

    /// The stock-in the returned units go back to.
    pub stock_in_id: String,

    /// Units returned. Always positive.
    pub quantity: i64,

    pub customer: String,

    /// Free-form reason given at the counter.
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: i64,
}

impl SalesReturn {
    /// Creates a new sales-return record awaiting enqueue.
    pub fn new(
        stock_in_id: impl Into<String>,
        quantity: i64,
        customer: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        SalesReturn {
            local_id: String::new(),
            server_id: None,
            stock_in_id: stock_in_id.into(),
            quantity,
            customer: customer.into(),
            reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

impl SyncRecord for SalesReturn {
    const KIND: EntityKind = EntityKind::SalesReturn;

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn set_local_id(&mut self, id: String) {
        self.local_id = id;
    }

    fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    fn set_server_id(&mut self, id: Option<String>) {
        self.server_id = id;
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn quantity_effect(&self) -> Option<QuantityEffect> {
        Some(QuantityEffect::restore(&self.stock_in_id, self.quantity))
    }

    fn referenced_stock_in(&self) -> Option<&str> {
        Some(&self.stock_in_id)
    }

    fn set_referenced_stock_in(&mut self, id: String) {
        self.stock_in_id = id;
    }

    fn content_fingerprint(&self) -> String {
        format!("{}|{}|{}", self.stock_in_id, self.quantity, self.customer)
    }

    fn validate(&self) -> ValidationResult<()> {
        if self.stock_in_id.trim().is_empty() {
            return Err(ValidationError::required("stock_in_id"));
        }
        if self.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }
        if self.customer.trim().is_empty() {
            return Err(ValidationError::required("customer"));
        }
        Ok(())
    }
}

// =============================================================================
// Backorder
// =============================================================================

/// A customer order for stock that is not on hand. No quantity effect -
/// backorders record unmet demand, they do not move inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backorder {
    #[serde(default)]
    pub local_id: String,

    #[serde(default)]
    pub server_id: Option<String>,

    pub product_name: String,

    /// Units wanted.
    pub quantity: i64,

    pub customer: String,

    pub note: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: i64,
}

impl Backorder {
    /// Creates a new backorder record awaiting enqueue.
    pub fn new(
        product_name: impl Into<String>,
        quantity: i64,
        customer: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Backorder {
            local_id: String::new(),
            server_id: None,
            product_name: product_name.into(),
            quantity,
            customer: customer.into(),
            note: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

impl SyncRecord for Backorder {
    const KIND: EntityKind = EntityKind::Backorder;

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn set_local_id(&mut self, id: String) {
        self.local_id = id;
    }

    fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    fn set_server_id(&mut self, id: Option<String>) {
        self.server_id = id;
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn content_fingerprint(&self) -> String {
        format!("{}|{}|{}", self.product_name, self.quantity, self.customer)
    }

    fn validate(&self) -> ValidationResult<()> {
        if self.product_name.trim().is_empty() {
            return Err(ValidationError::required("product_name"));
        }
        if self.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }
        if self.customer.trim().is_empty() {
            return Err(ValidationError::required("customer"));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_quantity_prefers_overlay() {
        let mut si = StockIn::new("Beans", "BEAN-1", 10, Money::from_cents(500));
        assert_eq!(si.available_quantity(), 10);
        si.offline_quantity = Some(7);
        assert_eq!(si.available_quantity(), 7);
        // Authoritative quantity untouched by the overlay.
        assert_eq!(si.quantity, 10);
    }

    #[test]
    fn test_stock_out_effect_consumes() {
        let so = StockOut::new("si-1", 3, Money::from_cents(1200), "Ada");
        let effect = so.quantity_effect().unwrap();
        assert_eq!(effect.stock_in, "si-1");
        assert_eq!(effect.delta, -3);
        assert_eq!(so.total().unwrap().cents(), 3600);
    }

    #[test]
    fn test_sales_return_effect_restores() {
        let sr = SalesReturn::new("si-1", 2, "Ada");
        assert_eq!(sr.quantity_effect().unwrap().delta, 2);
    }

    #[test]
    fn test_backorder_has_no_effect() {
        let bo = Backorder::new("Beans", 5, "Ada");
        assert!(bo.quantity_effect().is_none());
        assert!(bo.referenced_stock_in().is_none());
    }

    #[test]
    fn test_validation_rejects_bad_records() {
        assert!(StockOut::new("", 3, Money::from_cents(100), "Ada")
            .validate()
            .is_err());
        assert!(StockOut::new("si-1", 0, Money::from_cents(100), "Ada")
            .validate()
            .is_err());
        assert!(StockOut::new("si-1", 3, Money::from_cents(100), " ")
            .validate()
            .is_err());
        assert!(StockOut::new("si-1", 3, Money::from_cents(100), "Ada")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_offline_quantity_never_serialized() {
        let mut si = StockIn::new("Beans", "BEAN-1", 10, Money::from_cents(500));
        si.offline_quantity = Some(7);
        let json = serde_json::to_value(&si).unwrap();
        assert!(json.get("offline_quantity").is_none());
    }

    #[test]
    fn test_reconcile_keeps_local_id_only() {
        let mut local = StockOut::new("si-1", 3, Money::from_cents(100), "Ada");
        local.local_id = "l-1".to_string();

        let mut remote = local.clone();
        remote.local_id = String::new();
        remote.server_id = Some("srv-9".to_string());
        remote.quantity = 4; // server's word wins
        remote.version = 2;

        let merged = StockOut::reconcile(&local, remote);
        assert_eq!(merged.local_id, "l-1");
        assert_eq!(merged.server_id.as_deref(), Some("srv-9"));
        assert_eq!(merged.quantity, 4);
        assert_eq!(merged.version, 2);
    }
}
