// src/models/item.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

use super::Category;

// ==================== ITEM MASTER ====================

/// Historical record of one purchased lot. The quantity here is the
/// quantity at intake; current stock lives in `StockLot`.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ItemMaster {
    pub id: String,
    pub internal_name: String,
    pub display_name: String,
    pub category: Category,
    pub quantity: f64,
    pub unit: String,
    pub expiry_date: DateTime<Utc>,
    pub batch_id: String,
    pub vendor: Option<String>,
    pub price_per_unit: Option<f64>,
    pub department: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==================== INTAKE DTOs ====================

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct IntakeLine {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(range(min = 0.0001, message = "Quantity must be positive"))]
    pub quantity: f64,

    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: String,

    pub expiry_date: DateTime<Utc>,

    #[validate(length(max = 255, message = "Vendor cannot exceed 255 characters"))]
    pub vendor: Option<String>,

    #[validate(range(min = 0.0, message = "Price per unit cannot be negative"))]
    pub price_per_unit: Option<f64>,

    #[validate(length(max = 255, message = "Department cannot exceed 255 characters"))]
    pub department: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IntakeRequest {
    pub category: Category,

    #[validate(length(min = 1, message = "At least one line is required"), nested)]
    pub lines: Vec<IntakeLine>,

    /// Reuse the most recently issued batch id instead of generating one.
    #[serde(default)]
    pub use_previous_batch_id: bool,
}

/// Outcome of a single intake line: either a fresh lot was created or an
/// existing lot with identical identity was replenished.
#[derive(Debug, Serialize)]
pub struct IntakeLineResult {
    pub display_name: String,
    pub internal_name: String,
    pub master_id: String,
    pub replenished: bool,
    pub quantity: f64,
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub batch_id: String,
    pub items: Vec<IntakeLineResult>,
}
