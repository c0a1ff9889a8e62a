// src/allocation_handlers.rs
//
// HTTP surface over the allocation engine: batch allocation to a lab,
// plus registration and issue/return of serialized equipment.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::allocation::{self, AllocationLine};
use crate::error::{validate_lab_id, ApiError, ApiResult, CENTRAL_LAB};
use crate::handlers::{actor_from_request, ApiResponse, PaginationQuery};
use crate::models::{
    Category, EquipmentItem, IssueEquipmentRequest, RegisterEquipmentRequest,
    ReturnEquipmentRequest,
};
use crate::AppState;

// ==================== BATCH ALLOCATION ====================

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct AllocationLineRequest {
    #[validate(length(min = 1, max = 255, message = "Item name must be between 1 and 255 characters"))]
    pub display_name: String,

    #[validate(range(min = 0.0001, message = "Quantity must be positive"))]
    pub quantity: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AllocateRequest {
    pub category: Category,

    #[validate(length(min = 1, message = "Destination lab is required"))]
    pub dest_lab_id: String,

    #[validate(length(min = 1, message = "At least one line is required"), nested)]
    pub lines: Vec<AllocationLineRequest>,
}

// The central store is the source side of every allocation.
fn validate_allocation_destination(lab_id: &str) -> Result<(), ApiError> {
    validate_lab_id(lab_id)?;
    if lab_id == CENTRAL_LAB {
        return Err(ApiError::ValidationError(
            "Cannot allocate to the central store".to_string(),
        ));
    }
    Ok(())
}

pub async fn allocate_to_lab(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<AllocateRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    body.validate()?;
    validate_allocation_destination(&body.dest_lab_id)?;

    let lines: Vec<AllocationLine> = body
        .lines
        .iter()
        .map(|l| AllocationLine {
            display_name: l.display_name.trim().to_string(),
            quantity: l.quantity,
        })
        .collect();

    let report = allocation::allocate(
        &app_state.db_pool,
        body.category,
        &body.dest_lab_id,
        &lines,
        &actor_id,
        None,
    )
    .await?;

    if report.committed {
        app_state.cache.remove_prefix("stock:").await;
        Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
    } else {
        // Nothing moved; the report tells the caller which lines to fix.
        let failed = report.failed_lines().count();
        Ok(HttpResponse::Conflict().json(ApiResponse {
            success: false,
            data: Some(report),
            message: Some(format!("Allocation rolled back: {} line(s) failed", failed)),
        }))
    }
}

// ==================== EQUIPMENT ====================

/// Register `count` physical units under one product name. Tags are
/// PRODUCT-XXXX with a sequential counter per product.
pub async fn register_equipment(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<RegisterEquipmentRequest>,
) -> ApiResult<HttpResponse> {
    actor_from_request(&req)?;
    body.validate()?;

    let mut tx = app_state.db_pool.begin().await?;

    let (existing,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM equipment_items WHERE product_name = ?1")
            .bind(&body.product_name)
            .fetch_one(&mut *tx)
            .await?;

    let prefix: String = body
        .product_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_uppercase();

    let mut created = Vec::with_capacity(body.count as usize);
    for n in 0..body.count as i64 {
        let item_tag = format!("{}-{:04}", prefix, existing + n + 1);
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO equipment_items
               (id, item_tag, product_name, variant, unit, lab_id, status, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'available', CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)"#,
        )
        .bind(&id)
        .bind(&item_tag)
        .bind(&body.product_name)
        .bind(&body.variant)
        .bind(&body.unit)
        .bind(CENTRAL_LAB)
        .execute(&mut *tx)
        .await?;
        created.push(item_tag);
    }

    tx.commit().await?;

    Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
        "product_name": body.product_name,
        "item_tags": created,
    }))))
}

pub async fn list_equipment(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let status = query.status.as_deref();
    let lab_id = query.lab_id.as_deref();

    let items = sqlx::query_as::<_, EquipmentItem>(
        r#"SELECT * FROM equipment_items
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR lab_id = ?2)
           ORDER BY product_name ASC, item_tag ASC"#,
    )
    .bind(status)
    .bind(lab_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

pub async fn issue_equipment(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<IssueEquipmentRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    body.validate()?;
    validate_lab_id(&body.to_lab_id)?;

    let item =
        allocation::issue_equipment_item(&app_state.db_pool, &body.item_tag, &body.to_lab_id, &actor_id)
            .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

pub async fn return_equipment(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<ReturnEquipmentRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    body.validate()?;

    let item =
        allocation::return_equipment_item(&app_state.db_pool, &body.item_tag, &actor_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn central_store_is_not_an_allocation_destination() {
        assert!(validate_allocation_destination("LAB01").is_ok());
        assert!(matches!(
            validate_allocation_destination(CENTRAL_LAB),
            Err(ApiError::ValidationError(_))
        ));
        assert!(validate_allocation_destination("LAB99").is_err());
    }

    #[test]
    fn empty_line_list_fails_validation() {
        let request = AllocateRequest {
            category: Category::Chemical,
            dest_lab_id: "LAB01".to_string(),
            lines: vec![],
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("lines"));
    }
}
