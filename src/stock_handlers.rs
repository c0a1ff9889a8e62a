// src/stock_handlers.rs
//
// Read side: stock listings, the out-of-stock registry, the movement
// ledger and per-lab distribution. Lab-facing listings go through the
// response cache; writers invalidate the "stock:" prefix.

use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::error::{validate_lab_id, ApiResult, CENTRAL_LAB};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{ItemMaster, LabDistribution, LedgerEntry, OutOfStockEntry, StockView};
use crate::AppState;

// ==================== STOCK LISTINGS ====================

/// Live stock at one location, as the display-name projection the UI
/// shows. `central-store` is a valid location here.
pub async fn get_lab_stock(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let lab_id = path.into_inner();
    if lab_id != CENTRAL_LAB {
        validate_lab_id(&lab_id)?;
    }

    let cache_key = format!("stock:{}", lab_id);
    if let Some(cached) = app_state.cache.get(&cache_key).await {
        return Ok(HttpResponse::Ok()
            .content_type("application/json")
            .body(cached));
    }

    let rows = sqlx::query_as::<_, StockView>(
        r#"SELECT sl.id, sl.master_id, sl.display_name, sl.quantity, sl.unit,
                  sl.expiry_date, im.batch_id, im.vendor
           FROM stock_lots sl
           JOIN item_masters im ON im.id = sl.master_id
           WHERE sl.lab_id = ?1
           ORDER BY sl.display_name ASC, sl.expiry_date ASC"#,
    )
    .bind(&lab_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    let body = serde_json::to_string(&ApiResponse::success(rows))?;
    app_state.cache.set(&cache_key, body.clone()).await;

    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(body))
}

/// Historical intake records, paginated, optionally filtered by search
/// term or category.
pub async fn list_item_masters(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();
    let search = query
        .search
        .as_deref()
        .map(|s| format!("%{}%", s))
        .unwrap_or_else(|| "%".to_string());
    let category = query.category.map(|c| c.to_string());

    let (total,): (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*) FROM item_masters
           WHERE display_name LIKE ?1 AND (?2 IS NULL OR category = ?2)"#,
    )
    .bind(&search)
    .bind(&category)
    .fetch_one(&app_state.db_pool)
    .await?;

    let data = sqlx::query_as::<_, ItemMaster>(
        r#"SELECT * FROM item_masters
           WHERE display_name LIKE ?1 AND (?2 IS NULL OR category = ?2)
           ORDER BY created_at DESC
           LIMIT ?3 OFFSET ?4"#,
    )
    .bind(&search)
    .bind(&category)
    .bind(per_page)
    .bind(offset)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(PaginatedResponse {
        data,
        total,
        page,
        per_page,
        total_pages: (total + per_page - 1) / per_page,
    }))
}

// ==================== OUT OF STOCK ====================

pub async fn list_out_of_stock(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let entries = sqlx::query_as::<_, OutOfStockEntry>(
        "SELECT * FROM out_of_stock ORDER BY last_depleted_at DESC",
    )
    .fetch_all(&app_state.db_pool)
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}

// ==================== MOVEMENT LEDGER ====================

pub async fn list_ledger_entries(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();
    let kind = query.kind.as_deref();
    let lab_id = query.lab_id.as_deref();

    let (total,): (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*) FROM ledger_entries
           WHERE (?1 IS NULL OR kind = ?1)
             AND (?2 IS NULL OR from_lab_id = ?2 OR to_lab_id = ?2)"#,
    )
    .bind(kind)
    .bind(lab_id)
    .fetch_one(&app_state.db_pool)
    .await?;

    let data = sqlx::query_as::<_, LedgerEntry>(
        r#"SELECT * FROM ledger_entries
           WHERE (?1 IS NULL OR kind = ?1)
             AND (?2 IS NULL OR from_lab_id = ?2 OR to_lab_id = ?2)
           ORDER BY created_at DESC
           LIMIT ?3 OFFSET ?4"#,
    )
    .bind(kind)
    .bind(lab_id)
    .bind(per_page)
    .bind(offset)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(PaginatedResponse {
        data,
        total,
        page,
        per_page,
        total_pages: (total + per_page - 1) / per_page,
    }))
}

// ==================== DISTRIBUTION ====================

/// How much live stock each lab holds, central store included.
pub async fn lab_distribution(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let rows = sqlx::query_as::<_, LabDistribution>(
        r#"SELECT lab_id, COUNT(*) AS lot_count, SUM(quantity) AS total_quantity
           FROM stock_lots
           GROUP BY lab_id
           ORDER BY lab_id ASC"#,
    )
    .fetch_all(&app_state.db_pool)
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(rows)))
}
