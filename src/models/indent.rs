// src/models/indent.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumString};

// ==================== PROCUREMENT INDENT ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndentStatus {
    Draft,
    Pending,
    Approved,
    Allocated,
    Purchasing,
    Purchased,
    Rejected,
    Fulfilled,
    PartiallyFulfilled,
}

impl IndentStatus {
    /// Terminal states admit no further transition (except the
    /// fulfill-remaining retry on partially fulfilled indents).
    pub fn is_terminal(self) -> bool {
        matches!(self, IndentStatus::Rejected | IndentStatus::Purchased | IndentStatus::Fulfilled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndentRole {
    LabAssistant,
    CentralAdmin,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Indent {
    pub id: String,
    pub created_by: String,
    pub created_by_role: IndentRole,
    pub lab_id: Option<String>,
    pub vendor_name: Option<String>,
    pub total_price: Option<f64>,
    pub status: IndentStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct IndentLine {
    pub id: String,
    pub indent_id: String,
    pub item_name: String,
    pub quantity: f64,
    pub unit: String,
    pub price_per_unit: Option<f64>,
    pub remarks: Option<String>,
    pub is_allocated: bool,
    pub allocated_quantity: f64,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct IndentComment {
    pub id: String,
    pub indent_id: String,
    pub author_id: String,
    pub author_role: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct IndentDetails {
    #[serde(flatten)]
    pub indent: Indent,
    pub lines: Vec<IndentLine>,
    pub comments: Vec<IndentComment>,
}

// ==================== DTOs ====================

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct IndentLineRequest {
    #[validate(length(min = 1, max = 255, message = "Item name must be between 1 and 255 characters"))]
    pub item_name: String,

    #[validate(range(min = 0.0001, message = "Quantity must be positive"))]
    pub quantity: f64,

    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: String,

    #[validate(range(min = 0.0, message = "Price per unit cannot be negative"))]
    pub price_per_unit: Option<f64>,

    #[validate(length(max = 500, message = "Remarks cannot exceed 500 characters"))]
    pub remarks: Option<String>,
}

/// Lab assistants submit directly to `pending`; there is no draft stage
/// for lab-originated indents.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLabIndentRequest {
    #[validate(length(min = 1, message = "Lab ID is required"))]
    pub lab_id: String,

    #[validate(length(min = 1, message = "At least one line is required"), nested)]
    pub lines: Vec<IndentLineRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDraftIndentRequest {
    #[validate(length(min = 1, max = 255, message = "Vendor name must be between 1 and 255 characters"))]
    pub vendor_name: String,

    #[validate(length(min = 1, message = "At least one line is required"), nested)]
    pub lines: Vec<IndentLineRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddCommentRequest {
    #[validate(length(min = 1, max = 1000, message = "Comment must be between 1 and 1000 characters"))]
    pub body: String,

    #[validate(length(max = 50, message = "Role cannot exceed 50 characters"))]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecideLabIndentRequest {
    pub status: IndentStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecideCentralIndentRequest {
    pub status: IndentStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndentLineOutcome {
    pub item_name: String,
    pub status: String,
    pub allocated_quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndentDecisionResponse {
    pub status: IndentStatus,
    pub line_outcomes: Vec<IndentLineOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(IndentStatus::Rejected.is_terminal());
        assert!(IndentStatus::Purchased.is_terminal());
        assert!(IndentStatus::Fulfilled.is_terminal());
        assert!(!IndentStatus::Pending.is_terminal());
        assert!(!IndentStatus::PartiallyFulfilled.is_terminal());
    }
}
