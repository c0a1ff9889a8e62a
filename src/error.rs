// src/error.rs - Error taxonomy for the stores service
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    ValidationError(String),
    /// Requested quantity exceeds FIFO-ordered supply. Carries the
    /// available amount so callers can retry with less.
    InsufficientStock { name: String, available: f64, requested: f64 },
    /// A guarded decrement found its precondition false: another writer
    /// consumed the stock first. The whole unit of work is aborted.
    ConcurrencyConflict(String),
    /// Unexpected data shape, e.g. two lots claiming the unsuffixed
    /// name. The next reindex of that name heals it.
    IntegrityError(String),
    InternalServerError(String),
    DatabaseError(sqlx::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::InsufficientStock { name, available, requested } => write!(
                f,
                "Insufficient stock for '{}'. Available: {}, Requested: {}",
                name, available, requested
            ),
            ApiError::ConcurrencyConflict(msg) => write!(f, "Concurrency Conflict: {}", msg),
            ApiError::IntegrityError(msg) => write!(f, "Integrity Error: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::InsufficientStock { .. } => HttpResponse::BadRequest().json(error_response),
            ApiError::ConcurrencyConflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::IntegrityError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InternalServerError(format!("Serialization failed: {}", err))
    }
}

// Domain-specific constructors
impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn lot_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Stock lot with ID '{}' not found", id))
    }

    pub fn indent_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Indent with ID '{}' not found", id))
    }

    pub fn request_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Request with ID '{}' not found", id))
    }

    pub fn insufficient_stock(name: &str, available: f64, requested: f64) -> Self {
        ApiError::InsufficientStock {
            name: name.to_string(),
            available,
            requested,
        }
    }

    pub fn stock_conflict(name: &str) -> Self {
        ApiError::ConcurrencyConflict(format!(
            "Stock for '{}' changed under a concurrent writer; retry the allocation",
            name
        ))
    }

    pub fn suffix_space_exhausted(display_name: &str) -> Self {
        ApiError::ValidationError(format!(
            "Too many concurrent lots for '{}': suffix alphabet A-Z is exhausted",
            display_name
        ))
    }
}

// Input validation helpers shared by handlers and the allocation engine

pub const CENTRAL_LAB: &str = "central-store";

pub const LAB_IDS: [&str; 8] = [
    "LAB01", "LAB02", "LAB03", "LAB04", "LAB05", "LAB06", "LAB07", "LAB08",
];

pub fn validate_lab_id(lab_id: &str) -> Result<(), ApiError> {
    if lab_id == CENTRAL_LAB || LAB_IDS.contains(&lab_id) {
        return Ok(());
    }
    Err(ApiError::ValidationError(format!("Invalid lab ID '{}'", lab_id)))
}

pub fn validate_quantity(quantity: f64) -> Result<(), ApiError> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(ApiError::ValidationError("Quantity must be positive".to_string()));
    }
    if quantity > 1e9 {
        return Err(ApiError::ValidationError("Quantity too large".to_string()));
    }
    Ok(())
}

pub fn validate_unit(unit: &str) -> Result<(), ApiError> {
    let valid_units = [
        "g", "kg", "mg", "L", "l", "mL", "ml", "mol", "mmol", "pieces", "pcs", "box", "set",
    ];
    if !valid_units.contains(&unit) {
        return Err(ApiError::ValidationError(format!(
            "Invalid unit '{}'. Valid units: {}",
            unit,
            valid_units.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_id_validation() {
        assert!(validate_lab_id(CENTRAL_LAB).is_ok());
        assert!(validate_lab_id("LAB03").is_ok());
        assert!(validate_lab_id("LAB99").is_err());
        assert!(validate_lab_id("").is_err());
    }

    #[test]
    fn quantity_validation() {
        assert!(validate_quantity(0.5).is_ok());
        assert!(validate_quantity(0.0).is_err());
        assert!(validate_quantity(-3.0).is_err());
        assert!(validate_quantity(f64::NAN).is_err());
        assert!(validate_quantity(2e9).is_err());
    }

    #[test]
    fn unit_validation() {
        assert!(validate_unit("ml").is_ok());
        assert!(validate_unit("mL").is_ok());
        assert!(validate_unit("pcs").is_ok());
        assert!(validate_unit("furlong").is_err());
    }

    #[test]
    fn insufficient_stock_message_carries_amounts() {
        let err = ApiError::insufficient_stock("Acetone", 50.0, 100.0);
        let msg = err.to_string();
        assert!(msg.contains("Acetone"));
        assert!(msg.contains("50"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn stock_conflict_maps_to_conflict_response() {
        let err = ApiError::stock_conflict("Acetone");
        assert!(err.to_string().contains("Acetone"));
        assert_eq!(
            err.error_response().status(),
            actix_web::http::StatusCode::CONFLICT
        );
    }
}
