// src/models/stock.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::Category;

// ==================== LIVE STOCK ====================

/// The authoritative current-quantity record: one row per item identity
/// and location. `internal_name` carries the expiry-lot suffix; faculty
/// and lab UIs only ever see `display_name`.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockLot {
    pub id: String,
    pub master_id: String,
    pub category: Category,
    pub internal_name: String,
    pub display_name: String,
    pub unit: String,
    pub lab_id: String,
    pub quantity: f64,
    pub original_quantity: f64,
    pub expiry_date: DateTime<Utc>,
    pub is_allocated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Display-name projection for UI listings.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StockView {
    pub id: String,
    pub master_id: String,
    pub display_name: String,
    pub quantity: f64,
    pub unit: String,
    pub expiry_date: DateTime<Utc>,
    pub batch_id: String,
    pub vendor: Option<String>,
}

// ==================== OUT OF STOCK ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct OutOfStockEntry {
    pub id: String,
    pub display_name: String,
    pub category: Category,
    pub unit: String,
    pub last_depleted_at: DateTime<Utc>,
}

// ==================== EXPIRED STOCK ====================

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ExpiredStockLog {
    pub id: String,
    pub lot_id: String,
    pub master_id: Option<String>,
    pub item_name: String,
    pub unit: String,
    pub quantity: f64,
    pub expiry_date: DateTime<Utc>,
    pub lab_id: String,
    pub reason: Option<String>,
    pub removed_by: String,
    pub created_at: DateTime<Utc>,
}

/// Administrative correction for an expired lot.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ExpiredAction {
    /// Fold the lot's remaining quantity into another lot, then delete it.
    Merge { merge_to_id: String, reason: Option<String> },
    /// Remove the lot outright.
    Delete { reason: Option<String> },
    /// Correct the expiry date in place.
    UpdateExpiry { new_expiry_date: DateTime<Utc> },
}
