// src/handlers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::models::{Category, DashboardStats};
use crate::AppState;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub category: Option<Category>,
    pub kind: Option<String>,
    pub lab_id: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl PaginationQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

/// Identity of the caller. Authentication lives in front of this
/// service; it forwards the authenticated user in a header.
pub fn actor_from_request(req: &HttpRequest) -> ApiResult<String> {
    req.headers()
        .get("X-Actor-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing X-Actor-Id header"))
}

// ==================== HEALTH / DASHBOARD ====================

pub async fn health_check(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    sqlx::query("SELECT 1")
        .fetch_one(&app_state.db_pool)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

pub async fn get_dashboard_stats(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let pool = &app_state.db_pool;

    let (total_masters,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM item_masters")
        .fetch_one(pool)
        .await?;
    let (total_live_lots,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_lots")
        .fetch_one(pool)
        .await?;
    let (total_equipment,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM equipment_items")
        .fetch_one(pool)
        .await?;
    let (out_of_stock_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM out_of_stock")
        .fetch_one(pool)
        .await?;
    let (pending_indents,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM indents WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;
    let (pending_requests,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM requests WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;
    let (expiring_within_30_days,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM stock_lots WHERE expiry_date <= datetime('now', '+30 days')",
    )
    .fetch_one(pool)
    .await?;

    let stats = DashboardStats {
        total_masters,
        total_live_lots,
        total_equipment,
        out_of_stock_count,
        pending_indents,
        pending_requests,
        expiring_within_30_days,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        let q = PaginationQuery {
            page: None,
            per_page: None,
            search: None,
            category: None,
            kind: None,
            lab_id: None,
            status: None,
            date_from: None,
            date_to: None,
        };
        assert_eq!(q.normalize(), (1, 20, 0));

        let q = PaginationQuery {
            page: Some(3),
            per_page: Some(500),
            search: None,
            category: None,
            kind: None,
            lab_id: None,
            status: None,
            date_from: None,
            date_to: None,
        };
        assert_eq!(q.normalize(), (3, 100, 200));
    }

    #[test]
    fn actor_header_is_required() {
        let req = actix_web::test::TestRequest::default()
            .insert_header(("X-Actor-Id", "admin-1"))
            .to_http_request();
        assert_eq!(actor_from_request(&req).unwrap(), "admin-1");

        let req = actix_web::test::TestRequest::default().to_http_request();
        assert!(actor_from_request(&req).is_err());
    }
}
