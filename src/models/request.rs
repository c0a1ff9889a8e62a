// src/models/request.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumString};

use super::Category;

// ==================== EXPERIMENT CONSUMPTION REQUEST ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Fulfilled,
    PartiallyFulfilled,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ConsumptionRequest {
    pub id: String,
    pub faculty_id: String,
    pub lab_id: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct RequestExperiment {
    pub id: String,
    pub request_id: String,
    pub experiment_name: String,
    pub scheduled_date: DateTime<Utc>,
    pub session: String,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct RequestLine {
    pub id: String,
    pub experiment_id: String,
    pub category: Category,
    pub item_name: String,
    pub quantity: f64,
    pub unit: String,
    pub allocated_quantity: f64,
    pub is_allocated: bool,
    pub allocated_by: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RequestDetails {
    #[serde(flatten)]
    pub request: ConsumptionRequest,
    pub experiments: Vec<RequestExperimentDetails>,
}

#[derive(Debug, Serialize)]
pub struct RequestExperimentDetails {
    #[serde(flatten)]
    pub experiment: RequestExperiment,
    pub lines: Vec<RequestLine>,
}

// ==================== DTOs ====================

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RequestLineInput {
    pub category: Category,

    #[validate(length(min = 1, max = 255, message = "Item name must be between 1 and 255 characters"))]
    pub item_name: String,

    #[validate(range(min = 0.0001, message = "Quantity must be positive"))]
    pub quantity: f64,

    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: String,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RequestExperimentInput {
    #[validate(length(min = 1, max = 255, message = "Experiment name must be between 1 and 255 characters"))]
    pub experiment_name: String,

    pub scheduled_date: DateTime<Utc>,

    #[validate(length(min = 1, message = "Session is required"))]
    pub session: String,

    #[validate(length(min = 1, message = "At least one line is required"), nested)]
    pub lines: Vec<RequestLineInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestRequest {
    #[validate(length(min = 1, message = "Faculty ID is required"))]
    pub faculty_id: String,

    #[validate(length(min = 1, message = "Lab ID is required"))]
    pub lab_id: String,

    #[validate(length(min = 1, message = "At least one experiment is required"), nested)]
    pub experiments: Vec<RequestExperimentInput>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequestRequest {
    pub status: RequestStatus,
    #[serde(default)]
    pub force: bool,
}

/// One line of the dry-run report returned when stock is short and
/// `force` is false.
#[derive(Debug, Serialize)]
pub struct LineAvailability {
    pub experiment_name: String,
    pub item_name: String,
    pub required_quantity: f64,
    pub available_quantity: f64,
    pub unit: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FulfillmentPreview {
    pub fulfillable: Vec<LineAvailability>,
    pub unfulfillable: Vec<LineAvailability>,
    pub requires_confirmation: bool,
}
