// src/indent_handlers.rs
//
// Procurement indents. Lab assistants submit straight to `pending`;
// central admins build drafts first. Approving a lab indent allocates
// each chemical line independently, so a short line degrades the
// indent to `partially_fulfilled` instead of rolling back its
// siblings. A purchased central indent materializes fresh central
// stock through the intake path.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::allocation::{self, AllocationLine};
use crate::error::{validate_lab_id, ApiError, ApiResult};
use crate::handlers::{actor_from_request, ApiResponse, PaginationQuery};
use crate::intake_handlers::perform_intake;
use crate::models::{
    AddCommentRequest, Category, CreateDraftIndentRequest, CreateLabIndentRequest,
    DecideCentralIndentRequest, DecideLabIndentRequest, Indent, IndentComment,
    IndentDecisionResponse, IndentDetails, IndentLine, IndentLineOutcome, IndentLineRequest,
    IndentRole, IndentStatus, IntakeLine, IntakeRequest, MovementKind,
};
use crate::AppState;

// ==================== CREATION ====================

fn total_price(lines: &[IndentLineRequest]) -> Option<f64> {
    let priced: Vec<f64> = lines
        .iter()
        .filter_map(|l| l.price_per_unit.map(|p| p * l.quantity))
        .collect();
    if priced.len() == lines.len() {
        Some(priced.iter().sum())
    } else {
        None
    }
}

async fn insert_indent(
    pool: &SqlitePool,
    created_by: &str,
    role: IndentRole,
    lab_id: Option<&str>,
    vendor_name: Option<&str>,
    status: IndentStatus,
    lines: &[IndentLineRequest],
) -> ApiResult<String> {
    let mut tx = pool.begin().await?;
    let indent_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let submitted_at = if status == IndentStatus::Pending {
        Some(now)
    } else {
        None
    };

    sqlx::query(
        r#"INSERT INTO indents
           (id, created_by, created_by_role, lab_id, vendor_name, total_price,
            status, submitted_at, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"#,
    )
    .bind(&indent_id)
    .bind(created_by)
    .bind(role)
    .bind(lab_id)
    .bind(vendor_name)
    .bind(total_price(lines))
    .bind(status)
    .bind(submitted_at)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for line in lines {
        sqlx::query(
            r#"INSERT INTO indent_lines
               (id, indent_id, item_name, quantity, unit, price_per_unit, remarks,
                is_allocated, allocated_quantity, failure_reason)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, NULL)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&indent_id)
        .bind(line.item_name.trim())
        .bind(line.quantity)
        .bind(&line.unit)
        .bind(line.price_per_unit)
        .bind(&line.remarks)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(indent_id)
}

pub async fn create_lab_indent(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<CreateLabIndentRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    body.validate()?;
    validate_lab_id(&body.lab_id)?;

    let indent_id = insert_indent(
        &app_state.db_pool,
        &actor_id,
        IndentRole::LabAssistant,
        Some(&body.lab_id),
        None,
        IndentStatus::Pending,
        &body.lines,
    )
    .await?;

    info!(indent_id = %indent_id, lab_id = %body.lab_id, "lab indent submitted");
    Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
        "indent_id": indent_id,
        "status": IndentStatus::Pending,
    }))))
}

pub async fn create_draft_indent(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<CreateDraftIndentRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    body.validate()?;

    let indent_id = insert_indent(
        &app_state.db_pool,
        &actor_id,
        IndentRole::CentralAdmin,
        None,
        Some(&body.vendor_name),
        IndentStatus::Draft,
        &body.lines,
    )
    .await?;

    Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
        "indent_id": indent_id,
        "status": IndentStatus::Draft,
    }))))
}

// ==================== DRAFT EDITING ====================

async fn fetch_indent(pool: &SqlitePool, indent_id: &str) -> ApiResult<Indent> {
    sqlx::query_as::<_, Indent>("SELECT * FROM indents WHERE id = ?1")
        .bind(indent_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::indent_not_found(indent_id))
}

pub async fn add_draft_line(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<IndentLineRequest>,
) -> ApiResult<HttpResponse> {
    actor_from_request(&req)?;
    body.validate()?;
    let indent_id = path.into_inner();

    let indent = fetch_indent(&app_state.db_pool, &indent_id).await?;
    if indent.status != IndentStatus::Draft {
        return Err(ApiError::bad_request("Only draft indents are editable"));
    }

    sqlx::query(
        r#"INSERT INTO indent_lines
           (id, indent_id, item_name, quantity, unit, price_per_unit, remarks,
            is_allocated, allocated_quantity, failure_reason)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, NULL)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&indent_id)
    .bind(body.item_name.trim())
    .bind(body.quantity)
    .bind(&body.unit)
    .bind(body.price_per_unit)
    .bind(&body.remarks)
    .execute(&app_state.db_pool)
    .await?;

    recompute_total_price(&app_state.db_pool, &indent_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "indent_id": indent_id,
    }))))
}

/// Edit one line of a draft indent. Quantity, price and remarks are the
/// editable fields; allocation state is untouched.
pub async fn update_draft_line(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<IndentLineRequest>,
) -> ApiResult<HttpResponse> {
    actor_from_request(&req)?;
    body.validate()?;
    let (indent_id, line_id) = path.into_inner();

    let indent = fetch_indent(&app_state.db_pool, &indent_id).await?;
    if indent.status != IndentStatus::Draft {
        return Err(ApiError::bad_request("Only draft indents are editable"));
    }

    let result = sqlx::query(
        r#"UPDATE indent_lines
           SET item_name = ?1, quantity = ?2, unit = ?3, price_per_unit = ?4, remarks = ?5
           WHERE id = ?6 AND indent_id = ?7"#,
    )
    .bind(body.item_name.trim())
    .bind(body.quantity)
    .bind(&body.unit)
    .bind(body.price_per_unit)
    .bind(&body.remarks)
    .bind(&line_id)
    .bind(&indent_id)
    .execute(&app_state.db_pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Indent line"));
    }

    recompute_total_price(&app_state.db_pool, &indent_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "indent_id": indent_id,
        "line_id": line_id,
    }))))
}

async fn recompute_total_price(pool: &SqlitePool, indent_id: &str) -> ApiResult<()> {
    sqlx::query(
        r#"UPDATE indents
           SET total_price = (
                   SELECT CASE WHEN COUNT(*) = COUNT(price_per_unit)
                               THEN SUM(price_per_unit * quantity) END
                   FROM indent_lines WHERE indent_id = ?1
               ),
               updated_at = CURRENT_TIMESTAMP
           WHERE id = ?1"#,
    )
    .bind(indent_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn submit_draft(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    actor_from_request(&req)?;
    let indent_id = path.into_inner();

    let result = sqlx::query(
        r#"UPDATE indents
           SET status = 'pending', submitted_at = CURRENT_TIMESTAMP,
               updated_at = CURRENT_TIMESTAMP
           WHERE id = ?1 AND status = 'draft'"#,
    )
    .bind(&indent_id)
    .execute(&app_state.db_pool)
    .await?;

    if result.rows_affected() == 0 {
        fetch_indent(&app_state.db_pool, &indent_id).await?;
        return Err(ApiError::bad_request("Only draft indents can be submitted"));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "indent_id": indent_id,
        "status": IndentStatus::Pending,
    }))))
}

// ==================== COMMENTS / LISTING ====================

pub async fn add_comment(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<AddCommentRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    body.validate()?;
    let indent_id = path.into_inner();
    fetch_indent(&app_state.db_pool, &indent_id).await?;

    insert_comment(
        &app_state.db_pool,
        &indent_id,
        &actor_id,
        body.role.as_deref().unwrap_or("member"),
        &body.body,
    )
    .await?;

    Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
        "indent_id": indent_id,
    }))))
}

async fn insert_comment(
    pool: &SqlitePool,
    indent_id: &str,
    author_id: &str,
    author_role: &str,
    body: &str,
) -> ApiResult<()> {
    sqlx::query(
        r#"INSERT INTO indent_comments (id, indent_id, author_id, author_role, body, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(indent_id)
    .bind(author_id)
    .bind(author_role)
    .bind(body)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_indent(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let indent_id = path.into_inner();
    let indent = fetch_indent(&app_state.db_pool, &indent_id).await?;

    let lines = sqlx::query_as::<_, IndentLine>(
        "SELECT * FROM indent_lines WHERE indent_id = ?1 ORDER BY rowid ASC",
    )
    .bind(&indent_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    let comments = sqlx::query_as::<_, IndentComment>(
        "SELECT * FROM indent_comments WHERE indent_id = ?1 ORDER BY created_at ASC",
    )
    .bind(&indent_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(IndentDetails {
        indent,
        lines,
        comments,
    })))
}

pub async fn list_indents(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let status = query.status.as_deref();
    let lab_id = query.lab_id.as_deref();

    let indents = sqlx::query_as::<_, Indent>(
        r#"SELECT * FROM indents
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR lab_id = ?2)
           ORDER BY created_at DESC"#,
    )
    .bind(status)
    .bind(lab_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(indents)))
}

// ==================== LAB INDENT DECISION ====================

/// Allocate every still-unallocated line of a lab indent, one
/// independent transaction per line. Returns the per-line outcomes and
/// whether every line of the indent is now allocated.
async fn allocate_indent_lines(
    pool: &SqlitePool,
    indent: &Indent,
    actor_id: &str,
) -> ApiResult<(Vec<IndentLineOutcome>, bool)> {
    let lab_id = indent
        .lab_id
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Indent has no destination lab"))?;

    let lines = sqlx::query_as::<_, IndentLine>(
        "SELECT * FROM indent_lines WHERE indent_id = ?1 AND is_allocated = 0 ORDER BY rowid ASC",
    )
    .bind(&indent.id)
    .fetch_all(pool)
    .await?;

    let mut outcomes = Vec::with_capacity(lines.len());
    for line in &lines {
        let report = allocation::allocate(
            pool,
            Category::Chemical,
            lab_id,
            &[AllocationLine {
                display_name: line.item_name.clone(),
                quantity: line.quantity,
            }],
            actor_id,
            Some(&indent.id),
        )
        .await?;

        if report.committed {
            sqlx::query(
                r#"UPDATE indent_lines
                   SET is_allocated = 1, allocated_quantity = ?1, failure_reason = NULL
                   WHERE id = ?2"#,
            )
            .bind(line.quantity)
            .bind(&line.id)
            .execute(pool)
            .await?;
            outcomes.push(IndentLineOutcome {
                item_name: line.item_name.clone(),
                status: "allocated".to_string(),
                allocated_quantity: line.quantity,
                reason: None,
            });
        } else {
            let reason = report
                .lines
                .first()
                .and_then(|l| l.reason.clone())
                .unwrap_or_else(|| "Allocation failed".to_string());
            sqlx::query("UPDATE indent_lines SET failure_reason = ?1 WHERE id = ?2")
                .bind(&reason)
                .bind(&line.id)
                .execute(pool)
                .await?;
            outcomes.push(IndentLineOutcome {
                item_name: line.item_name.clone(),
                status: "failed".to_string(),
                allocated_quantity: 0.0,
                reason: Some(reason),
            });
        }
    }

    let (unallocated,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM indent_lines WHERE indent_id = ?1 AND is_allocated = 0",
    )
    .bind(&indent.id)
    .fetch_one(pool)
    .await?;

    Ok((outcomes, unallocated == 0))
}

async fn set_indent_status(
    pool: &SqlitePool,
    indent_id: &str,
    status: IndentStatus,
) -> ApiResult<()> {
    sqlx::query("UPDATE indents SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2")
        .bind(status)
        .bind(indent_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn decide_lab_indent(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<DecideLabIndentRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    let indent_id = path.into_inner();
    let pool = &app_state.db_pool;

    let indent = fetch_indent(pool, &indent_id).await?;
    if indent.status != IndentStatus::Pending {
        return Err(ApiError::bad_request("Indent is not pending"));
    }

    let response = match body.status {
        IndentStatus::Rejected => {
            set_indent_status(pool, &indent_id, IndentStatus::Rejected).await?;
            IndentDecisionResponse {
                status: IndentStatus::Rejected,
                line_outcomes: Vec::new(),
            }
        }
        IndentStatus::Allocated => {
            let (line_outcomes, all_allocated) =
                allocate_indent_lines(pool, &indent, &actor_id).await?;
            let status = if all_allocated {
                IndentStatus::Allocated
            } else {
                IndentStatus::PartiallyFulfilled
            };
            set_indent_status(pool, &indent_id, status).await?;
            app_state.cache.remove_prefix("stock:").await;
            IndentDecisionResponse {
                status,
                line_outcomes,
            }
        }
        other => {
            return Err(ApiError::bad_request(&format!(
                "Lab indents cannot transition to '{}'",
                other
            )))
        }
    };

    if let Some(comment) = &body.comment {
        insert_comment(pool, &indent_id, &actor_id, "central_admin", comment).await?;
    }

    info!(indent_id = %indent_id, status = %response.status, "lab indent decided");
    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

/// Retry only the lines that failed last time. Every line allocated
/// moves the indent to `fulfilled`.
pub async fn fulfill_remaining(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    let indent_id = path.into_inner();
    let pool = &app_state.db_pool;

    let indent = fetch_indent(pool, &indent_id).await?;
    if indent.status != IndentStatus::PartiallyFulfilled {
        return Err(ApiError::bad_request(
            "Only partially fulfilled indents can be retried",
        ));
    }

    let (line_outcomes, all_allocated) = allocate_indent_lines(pool, &indent, &actor_id).await?;
    let status = if all_allocated {
        IndentStatus::Fulfilled
    } else {
        IndentStatus::PartiallyFulfilled
    };
    set_indent_status(pool, &indent_id, status).await?;
    app_state.cache.remove_prefix("stock:").await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(IndentDecisionResponse {
        status,
        line_outcomes,
    })))
}

// ==================== CENTRAL INDENT DECISION ====================

fn central_transition_allowed(from: IndentStatus, to: IndentStatus) -> bool {
    matches!(
        (from, to),
        (IndentStatus::Pending, IndentStatus::Approved)
            | (IndentStatus::Pending, IndentStatus::Rejected)
            | (IndentStatus::Pending, IndentStatus::Purchasing)
            | (IndentStatus::Pending, IndentStatus::Purchased)
            | (IndentStatus::Approved, IndentStatus::Purchasing)
            | (IndentStatus::Approved, IndentStatus::Purchased)
            | (IndentStatus::Purchasing, IndentStatus::Purchased)
    )
}

pub async fn decide_central_indent(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<DecideCentralIndentRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    let indent_id = path.into_inner();
    let pool = &app_state.db_pool;

    let indent = fetch_indent(pool, &indent_id).await?;
    if indent.created_by_role != IndentRole::CentralAdmin {
        return Err(ApiError::bad_request("Not a central indent"));
    }
    if indent.status.is_terminal() {
        return Err(ApiError::bad_request(&format!(
            "Indent is closed ('{}')",
            indent.status
        )));
    }
    if !central_transition_allowed(indent.status, body.status) {
        return Err(ApiError::bad_request(&format!(
            "Cannot transition from '{}' to '{}'",
            indent.status, body.status
        )));
    }

    if body.status == IndentStatus::Purchased {
        materialize_purchase(pool, &indent, &actor_id).await?;
        app_state.cache.remove_prefix("stock:").await;
    }
    set_indent_status(pool, &indent_id, body.status).await?;

    if let Some(comment) = &body.comment {
        insert_comment(pool, &indent_id, &actor_id, "central_admin", comment).await?;
    }

    info!(indent_id = %indent_id, status = %body.status, "central indent decided");
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "indent_id": indent_id,
        "status": body.status,
    }))))
}

/// A purchased indent is fresh stock from the vendor: run its lines
/// through the intake path under a purchase batch id. The vendor sets
/// expiry on delivery paperwork; until corrected it defaults to one
/// year out.
async fn materialize_purchase(pool: &SqlitePool, indent: &Indent, actor_id: &str) -> ApiResult<()> {
    let lines = sqlx::query_as::<_, IndentLine>(
        "SELECT * FROM indent_lines WHERE indent_id = ?1 ORDER BY rowid ASC",
    )
    .bind(&indent.id)
    .fetch_all(pool)
    .await?;

    let intake = IntakeRequest {
        category: Category::Chemical,
        lines: lines
            .iter()
            .map(|l| IntakeLine {
                name: l.item_name.clone(),
                quantity: l.quantity,
                unit: l.unit.clone(),
                expiry_date: Utc::now() + Duration::days(365),
                vendor: indent.vendor_name.clone(),
                price_per_unit: l.price_per_unit,
                department: None,
            })
            .collect(),
        use_previous_batch_id: false,
    };

    let batch_id = format!("BATCH-{}-IND", Utc::now().format("%Y%m%d"));
    perform_intake(
        pool,
        &intake,
        &batch_id,
        actor_id,
        MovementKind::Purchase,
        Some(&indent.id),
    )
    .await?;

    sqlx::query("UPDATE indent_lines SET is_allocated = 1, allocated_quantity = quantity WHERE indent_id = ?1")
        .bind(&indent.id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::CENTRAL_LAB;
    use crate::stock::test_support::*;

    fn line(name: &str, qty: f64) -> IndentLineRequest {
        IndentLineRequest {
            item_name: name.to_string(),
            quantity: qty,
            unit: "ml".to_string(),
            price_per_unit: Some(2.0),
            remarks: None,
        }
    }

    async fn pending_lab_indent(pool: &SqlitePool, lines: &[IndentLineRequest]) -> Indent {
        let id = insert_indent(
            pool,
            "assistant-1",
            IndentRole::LabAssistant,
            Some("LAB01"),
            None,
            IndentStatus::Pending,
            lines,
        )
        .await
        .unwrap();
        fetch_indent(pool, &id).await.unwrap()
    }

    #[tokio::test]
    async fn total_price_needs_every_line_priced() {
        let priced = vec![line("Acetone", 10.0), line("Ethanol", 5.0)];
        assert_eq!(total_price(&priced), Some(30.0));

        let mut partial = priced.clone();
        partial[1].price_per_unit = None;
        assert_eq!(total_price(&partial), None);
    }

    #[tokio::test]
    async fn short_line_degrades_indent_to_partially_fulfilled() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", CENTRAL_LAB, 20.0, expiry(2026, 1, 1)).await;
        seed_lot(&pool, Category::Chemical, "Ethanol", "Ethanol", CENTRAL_LAB, 2.0, expiry(2026, 1, 1)).await;

        let indent =
            pending_lab_indent(&pool, &[line("Acetone", 10.0), line("Ethanol", 5.0)]).await;
        let (outcomes, all) = allocate_indent_lines(&pool, &indent, "admin-1").await.unwrap();

        assert!(!all);
        assert_eq!(outcomes[0].status, "allocated");
        assert_eq!(outcomes[1].status, "failed");

        // The successful line's stock movement sticks.
        let (qty,): (f64,) = sqlx::query_as(
            "SELECT quantity FROM stock_lots WHERE display_name = 'Acetone' AND lab_id = 'LAB01'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(qty, 10.0);
    }

    #[tokio::test]
    async fn retry_picks_up_only_failed_lines() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", CENTRAL_LAB, 20.0, expiry(2026, 1, 1)).await;

        let indent =
            pending_lab_indent(&pool, &[line("Acetone", 10.0), line("Ethanol", 5.0)]).await;
        let (_, all) = allocate_indent_lines(&pool, &indent, "admin-1").await.unwrap();
        assert!(!all);

        // Ethanol arrives, retry should allocate it and nothing else.
        seed_lot(&pool, Category::Chemical, "Ethanol", "Ethanol", CENTRAL_LAB, 10.0, expiry(2026, 1, 1)).await;
        let (outcomes, all) = allocate_indent_lines(&pool, &indent, "admin-1").await.unwrap();
        assert!(all);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].item_name, "Ethanol");

        let (acetone,): (f64,) = sqlx::query_as(
            "SELECT quantity FROM stock_lots WHERE display_name = 'Acetone' AND lab_id = ?1",
        )
        .bind(CENTRAL_LAB)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(acetone, 10.0);
    }

    #[tokio::test]
    async fn purchased_indent_materializes_central_stock() {
        let pool = db::test_pool().await;
        let id = insert_indent(
            &pool,
            "admin-1",
            IndentRole::CentralAdmin,
            None,
            Some("Merck"),
            IndentStatus::Pending,
            &[line("Sulfuric Acid", 25.0)],
        )
        .await
        .unwrap();
        let indent = fetch_indent(&pool, &id).await.unwrap();

        materialize_purchase(&pool, &indent, "admin-1").await.unwrap();

        let (qty,): (f64,) = sqlx::query_as(
            "SELECT quantity FROM stock_lots WHERE display_name = 'Sulfuric Acid' AND lab_id = ?1",
        )
        .bind(CENTRAL_LAB)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(qty, 25.0);

        let (kind,): (String,) = sqlx::query_as(
            "SELECT kind FROM ledger_entries WHERE indent_id = ?1",
        )
        .bind(&id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(kind, "purchase");
    }

    #[tokio::test]
    async fn central_transitions_are_gated() {
        assert!(central_transition_allowed(IndentStatus::Pending, IndentStatus::Approved));
        assert!(central_transition_allowed(IndentStatus::Approved, IndentStatus::Purchasing));
        assert!(central_transition_allowed(IndentStatus::Purchasing, IndentStatus::Purchased));
        // An admin can skip the approval step and purchase straight away.
        assert!(central_transition_allowed(IndentStatus::Pending, IndentStatus::Purchasing));
        assert!(central_transition_allowed(IndentStatus::Pending, IndentStatus::Purchased));
        assert!(!central_transition_allowed(IndentStatus::Rejected, IndentStatus::Approved));
        assert!(!central_transition_allowed(IndentStatus::Purchased, IndentStatus::Pending));
    }
}
