// src/models/equipment.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumString};

// ==================== SERIALIZED EQUIPMENT ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EquipmentStatus {
    Available,
    Issued,
}

/// One physical equipment unit, identified by its tag. Allocation is a
/// status transition plus location reassignment, not a quantity change.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct EquipmentItem {
    pub id: String,
    pub item_tag: String,
    pub product_name: String,
    pub variant: Option<String>,
    pub unit: Option<String>,
    pub lab_id: String,
    pub status: EquipmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterEquipmentRequest {
    #[validate(length(min = 1, max = 255, message = "Product name must be between 1 and 255 characters"))]
    pub product_name: String,

    #[validate(length(max = 100, message = "Variant cannot exceed 100 characters"))]
    pub variant: Option<String>,

    #[validate(length(max = 20, message = "Unit cannot exceed 20 characters"))]
    pub unit: Option<String>,

    #[validate(range(min = 1, max = 500, message = "Count must be between 1 and 500"))]
    pub count: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueEquipmentRequest {
    #[validate(length(min = 1, message = "Item tag is required"))]
    pub item_tag: String,

    #[validate(length(min = 1, message = "Destination lab is required"))]
    pub to_lab_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReturnEquipmentRequest {
    #[validate(length(min = 1, message = "Item tag is required"))]
    pub item_tag: String,
}
