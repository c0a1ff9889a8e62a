// src/request_handlers.rs
//
// Faculty experiment requests. Approval with target status `fulfilled`
// first dry-runs the whole request against lab stock: any short line
// turns the response into a 206 preview with zero mutations, and the
// caller resubmits with `force` to take what is available. Fulfillment
// draws from the requesting lab's own stock, not the central store.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::allocation;
use crate::error::{validate_lab_id, ApiError, ApiResult};
use crate::handlers::{actor_from_request, ApiResponse, PaginationQuery};
use crate::ledger::{self, Movement};
use crate::models::{
    ApproveRequestRequest, Category, ConsumptionRequest, CreateRequestRequest,
    FulfillmentPreview, LineAvailability, MovementKind, RequestDetails, RequestExperiment,
    RequestExperimentDetails, RequestLine, RequestStatus,
};
use crate::stock;
use crate::AppState;

// ==================== CREATION / READ ====================

pub async fn create_request(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<CreateRequestRequest>,
) -> ApiResult<HttpResponse> {
    actor_from_request(&req)?;
    body.validate()?;
    validate_lab_id(&body.lab_id)?;
    for experiment in &body.experiments {
        if experiment.session != "morning" && experiment.session != "afternoon" {
            return Err(ApiError::bad_request("Session must be morning or afternoon"));
        }
    }

    let mut tx = app_state.db_pool.begin().await?;
    let request_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO requests (id, faculty_id, lab_id, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, 'pending', ?4, ?4)"#,
    )
    .bind(&request_id)
    .bind(&body.faculty_id)
    .bind(&body.lab_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for experiment in &body.experiments {
        let experiment_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO request_experiments
               (id, request_id, experiment_name, scheduled_date, session)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(&experiment_id)
        .bind(&request_id)
        .bind(experiment.experiment_name.trim())
        .bind(experiment.scheduled_date)
        .bind(&experiment.session)
        .execute(&mut *tx)
        .await?;

        for line in &experiment.lines {
            sqlx::query(
                r#"INSERT INTO request_lines
                   (id, experiment_id, category, item_name, quantity, unit,
                    allocated_quantity, is_allocated, allocated_by, allocated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, NULL, NULL)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&experiment_id)
            .bind(line.category)
            .bind(line.item_name.trim())
            .bind(line.quantity)
            .bind(&line.unit)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    info!(request_id = %request_id, lab_id = %body.lab_id, "experiment request submitted");

    Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
        "request_id": request_id,
        "status": RequestStatus::Pending,
    }))))
}

async fn fetch_request(pool: &SqlitePool, request_id: &str) -> ApiResult<ConsumptionRequest> {
    sqlx::query_as::<_, ConsumptionRequest>("SELECT * FROM requests WHERE id = ?1")
        .bind(request_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::request_not_found(request_id))
}

pub async fn get_request(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let request_id = path.into_inner();
    let request = fetch_request(&app_state.db_pool, &request_id).await?;

    let experiments = sqlx::query_as::<_, RequestExperiment>(
        "SELECT * FROM request_experiments WHERE request_id = ?1 ORDER BY scheduled_date ASC",
    )
    .bind(&request_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    let mut details = Vec::with_capacity(experiments.len());
    for experiment in experiments {
        let lines = sqlx::query_as::<_, RequestLine>(
            "SELECT * FROM request_lines WHERE experiment_id = ?1 ORDER BY rowid ASC",
        )
        .bind(&experiment.id)
        .fetch_all(&app_state.db_pool)
        .await?;
        details.push(RequestExperimentDetails { experiment, lines });
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(RequestDetails {
        request,
        experiments: details,
    })))
}

pub async fn list_requests(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let status = query.status.as_deref();
    let lab_id = query.lab_id.as_deref();

    let requests = sqlx::query_as::<_, ConsumptionRequest>(
        r#"SELECT * FROM requests
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR lab_id = ?2)
           ORDER BY created_at DESC"#,
    )
    .bind(status)
    .bind(lab_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(requests)))
}

// ==================== FULFILLMENT ====================

#[derive(sqlx::FromRow)]
struct PendingLine {
    id: String,
    experiment_name: String,
    category: Category,
    item_name: String,
    quantity: f64,
    unit: String,
}

async fn pending_lines(pool: &SqlitePool, request_id: &str) -> ApiResult<Vec<PendingLine>> {
    let lines = sqlx::query_as::<_, PendingLine>(
        r#"SELECT rl.id, re.experiment_name, rl.category, rl.item_name, rl.quantity, rl.unit
           FROM request_lines rl
           JOIN request_experiments re ON re.id = rl.experiment_id
           WHERE re.request_id = ?1 AND rl.is_allocated = 0
           ORDER BY re.scheduled_date ASC, rl.rowid ASC"#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;
    Ok(lines)
}

/// Split the unallocated lines into fulfillable and unfulfillable,
/// consuming a running tally so two lines asking for the same item
/// cannot both count the same stock. Pure read.
async fn preview_fulfillment(
    pool: &SqlitePool,
    lab_id: &str,
    lines: &[PendingLine],
) -> ApiResult<FulfillmentPreview> {
    let mut tally: HashMap<(String, Category), f64> = HashMap::new();
    let mut fulfillable = Vec::new();
    let mut unfulfillable = Vec::new();

    for line in lines {
        let key = (line.item_name.clone(), line.category);
        if !tally.contains_key(&key) {
            let (available,): (Option<f64>,) = sqlx::query_as(
                r#"SELECT SUM(quantity) FROM stock_lots
                   WHERE display_name = ?1 AND category = ?2 AND lab_id = ?3"#,
            )
            .bind(&line.item_name)
            .bind(line.category)
            .bind(lab_id)
            .fetch_one(pool)
            .await?;
            tally.insert(key.clone(), available.unwrap_or(0.0));
        }

        let available = tally[&key];
        let entry = LineAvailability {
            experiment_name: line.experiment_name.clone(),
            item_name: line.item_name.clone(),
            required_quantity: line.quantity,
            available_quantity: available,
            unit: line.unit.clone(),
            reason: None,
        };
        if available >= line.quantity {
            *tally.get_mut(&key).unwrap() -= line.quantity;
            fulfillable.push(entry);
        } else {
            unfulfillable.push(LineAvailability {
                reason: Some(format!(
                    "Lab stock short by {}",
                    line.quantity - available
                )),
                ..entry
            });
        }
    }

    Ok(FulfillmentPreview {
        requires_confirmation: !unfulfillable.is_empty(),
        fulfillable,
        unfulfillable,
    })
}

/// Decrement lab stock for one line and stamp it allocated. The lab
/// may hold the item across several lot rows, so this walks them in
/// expiry order like any other draw.
async fn fulfill_line(
    tx: &mut Transaction<'_, Sqlite>,
    lab_id: &str,
    faculty_id: &str,
    line: &PendingLine,
    actor_id: &str,
) -> ApiResult<bool> {
    let lots = stock::find_lots_fifo(tx, line.category, &line.item_name, lab_id).await?;
    let available: f64 = lots.iter().map(|l| l.quantity).sum();
    if available < line.quantity {
        return Ok(false);
    }

    let mut remaining = line.quantity;
    for lot in &lots {
        if remaining <= 0.0 {
            break;
        }
        let take = lot.quantity.min(remaining);
        if !stock::guarded_decrement(tx, &lot.id, take).await? {
            return Err(ApiError::stock_conflict(&line.item_name));
        }
        remaining -= take;

        ledger::record(
            tx,
            Movement {
                kind: MovementKind::Transfer,
                lot_id: Some(&lot.id),
                item_name: &line.item_name,
                quantity: take,
                unit: &line.unit,
                from_lab_id: Some(lab_id),
                to_lab_id: Some(faculty_id),
                actor_id,
                indent_id: None,
            },
        )
        .await?;

        let refreshed = stock::get_lot(tx, &lot.id).await?;
        if let Some(refreshed) = refreshed {
            if refreshed.quantity <= 0.0 {
                allocation::on_lot_depleted(tx, &refreshed).await?;
            }
        }
    }

    sqlx::query(
        r#"UPDATE request_lines
           SET is_allocated = 1, allocated_quantity = ?1, allocated_by = ?2,
               allocated_at = CURRENT_TIMESTAMP
           WHERE id = ?3"#,
    )
    .bind(line.quantity)
    .bind(actor_id)
    .bind(&line.id)
    .execute(&mut **tx)
    .await?;

    Ok(true)
}

async fn fulfill_request(
    pool: &SqlitePool,
    request: &ConsumptionRequest,
    force: bool,
    actor_id: &str,
) -> ApiResult<(RequestStatus, Option<FulfillmentPreview>)> {
    let lines = pending_lines(pool, &request.id).await?;
    if lines.is_empty() {
        return Ok((RequestStatus::Fulfilled, None));
    }

    let preview = preview_fulfillment(pool, &request.lab_id, &lines).await?;
    if preview.requires_confirmation && !force {
        return Ok((request.status, Some(preview)));
    }

    let mut tx = pool.begin().await?;
    let mut any_short = false;
    for line in &lines {
        // Re-checked under the transaction; the preview was advisory.
        if !fulfill_line(&mut tx, &request.lab_id, &request.faculty_id, line, actor_id).await? {
            any_short = true;
        }
    }
    tx.commit().await?;

    let (unallocated,): (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*) FROM request_lines rl
           JOIN request_experiments re ON re.id = rl.experiment_id
           WHERE re.request_id = ?1 AND rl.is_allocated = 0"#,
    )
    .bind(&request.id)
    .fetch_one(pool)
    .await?;

    let status = if unallocated == 0 && !any_short {
        RequestStatus::Fulfilled
    } else {
        RequestStatus::PartiallyFulfilled
    };
    Ok((status, None))
}

async fn set_request_status(
    pool: &SqlitePool,
    request_id: &str,
    status: RequestStatus,
) -> ApiResult<()> {
    sqlx::query("UPDATE requests SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2")
        .bind(status)
        .bind(request_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn approve_request(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ApproveRequestRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    let request_id = path.into_inner();
    let pool = &app_state.db_pool;

    let request = fetch_request(pool, &request_id).await?;
    match request.status {
        RequestStatus::Pending | RequestStatus::Approved => {}
        _ => return Err(ApiError::bad_request("Request is already decided")),
    }

    match body.status {
        RequestStatus::Rejected => {
            set_request_status(pool, &request_id, RequestStatus::Rejected).await?;
            Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
                "request_id": request_id,
                "status": RequestStatus::Rejected,
            }))))
        }
        RequestStatus::Approved => {
            set_request_status(pool, &request_id, RequestStatus::Approved).await?;
            Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
                "request_id": request_id,
                "status": RequestStatus::Approved,
            }))))
        }
        RequestStatus::Fulfilled => {
            let (status, preview) = fulfill_request(pool, &request, body.force, &actor_id).await?;
            if let Some(preview) = preview {
                // Dry run only; nothing was touched.
                return Ok(HttpResponse::PartialContent().json(ApiResponse {
                    success: false,
                    data: Some(preview),
                    message: Some("Some lines are short, resubmit with force to proceed".to_string()),
                }));
            }
            set_request_status(pool, &request_id, status).await?;
            app_state.cache.remove_prefix("stock:").await;
            info!(request_id = %request_id, status = %status, "request fulfillment finished");
            Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
                "request_id": request_id,
                "status": status,
            }))))
        }
        other => Err(ApiError::bad_request(&format!(
            "Requests cannot transition to '{}'",
            other
        ))),
    }
}

/// Re-attempt only the lines that are still unallocated.
pub async fn fulfill_remaining(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    let request_id = path.into_inner();
    let pool = &app_state.db_pool;

    let request = fetch_request(pool, &request_id).await?;
    if request.status != RequestStatus::PartiallyFulfilled {
        return Err(ApiError::bad_request(
            "Only partially fulfilled requests can be retried",
        ));
    }

    let (status, _) = fulfill_request(pool, &request, true, &actor_id).await?;
    set_request_status(pool, &request_id, status).await?;
    app_state.cache.remove_prefix("stock:").await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "request_id": request_id,
        "status": status,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{RequestExperimentInput, RequestLineInput};
    use crate::stock::test_support::*;

    fn input_line(category: Category, name: &str, qty: f64) -> RequestLineInput {
        RequestLineInput {
            category,
            item_name: name.to_string(),
            quantity: qty,
            unit: "ml".to_string(),
        }
    }

    async fn seed_request(
        pool: &SqlitePool,
        lab_id: &str,
        lines: Vec<RequestLineInput>,
    ) -> ConsumptionRequest {
        let request_id = Uuid::new_v4().to_string();
        let experiment_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO requests (id, faculty_id, lab_id, status, created_at, updated_at)
               VALUES (?1, 'faculty-1', ?2, 'pending', ?3, ?3)"#,
        )
        .bind(&request_id)
        .bind(lab_id)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            r#"INSERT INTO request_experiments
               (id, request_id, experiment_name, scheduled_date, session)
               VALUES (?1, ?2, 'Titration', ?3, 'morning')"#,
        )
        .bind(&experiment_id)
        .bind(&request_id)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        for line in &lines {
            sqlx::query(
                r#"INSERT INTO request_lines
                   (id, experiment_id, category, item_name, quantity, unit,
                    allocated_quantity, is_allocated)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&experiment_id)
            .bind(line.category)
            .bind(&line.item_name)
            .bind(line.quantity)
            .bind(&line.unit)
            .execute(pool)
            .await
            .unwrap();
        }
        fetch_request(pool, &request_id).await.unwrap()
    }

    #[tokio::test]
    async fn short_lines_without_force_preview_only() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", "LAB01", 10.0, expiry(2026, 1, 1)).await;
        seed_lot(&pool, Category::Chemical, "Ethanol", "Ethanol", "LAB01", 10.0, expiry(2026, 1, 1)).await;
        seed_lot(&pool, Category::Chemical, "Methanol", "Methanol", "LAB01", 10.0, expiry(2026, 1, 1)).await;

        let request = seed_request(
            &pool,
            "LAB01",
            vec![
                input_line(Category::Chemical, "Acetone", 5.0),
                input_line(Category::Chemical, "Ethanol", 5.0),
                input_line(Category::Chemical, "Methanol", 5.0),
                input_line(Category::Chemical, "Benzene", 5.0),
                input_line(Category::Chemical, "Toluene", 5.0),
            ],
        )
        .await;

        let (status, preview) = fulfill_request(&pool, &request, false, "assistant-1")
            .await
            .unwrap();
        let preview = preview.expect("short request must return a preview");
        assert_eq!(status, RequestStatus::Pending);
        assert_eq!(preview.fulfillable.len(), 3);
        assert_eq!(preview.unfulfillable.len(), 2);

        // Dry run: stock untouched, lines unallocated.
        let (sum,): (f64,) =
            sqlx::query_as("SELECT SUM(quantity) FROM stock_lots WHERE lab_id = 'LAB01'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(sum, 30.0);
        let (ledger,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(ledger, 0);

        // Force takes the three that fit and leaves the rest flagged.
        let (status, preview) = fulfill_request(&pool, &request, true, "assistant-1")
            .await
            .unwrap();
        assert!(preview.is_none());
        assert_eq!(status, RequestStatus::PartiallyFulfilled);

        let (allocated,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM request_lines WHERE is_allocated = 1",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(allocated, 3);
    }

    #[tokio::test]
    async fn repeated_item_lines_share_one_tally() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", "LAB02", 8.0, expiry(2026, 1, 1)).await;

        let request = seed_request(
            &pool,
            "LAB02",
            vec![
                input_line(Category::Chemical, "Acetone", 5.0),
                input_line(Category::Chemical, "Acetone", 5.0),
            ],
        )
        .await;

        let lines = pending_lines(&pool, &request.id).await.unwrap();
        let preview = preview_fulfillment(&pool, "LAB02", &lines).await.unwrap();
        assert_eq!(preview.fulfillable.len(), 1);
        assert_eq!(preview.unfulfillable.len(), 1);
    }

    #[tokio::test]
    async fn full_stock_fulfills_in_one_pass() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", "LAB03", 20.0, expiry(2026, 1, 1)).await;
        seed_lot(&pool, Category::Glassware, "Beaker", "Beaker", "LAB03", 6.0, expiry(2030, 1, 1)).await;

        let request = seed_request(
            &pool,
            "LAB03",
            vec![
                input_line(Category::Chemical, "Acetone", 12.0),
                input_line(Category::Glassware, "Beaker", 2.0),
            ],
        )
        .await;

        let (status, preview) = fulfill_request(&pool, &request, false, "assistant-1")
            .await
            .unwrap();
        assert!(preview.is_none());
        assert_eq!(status, RequestStatus::Fulfilled);

        let (acetone,): (f64,) = sqlx::query_as(
            "SELECT quantity FROM stock_lots WHERE display_name = 'Acetone' AND lab_id = 'LAB03'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(acetone, 8.0);

        let (transfers,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ledger_entries WHERE kind = 'transfer'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(transfers, 2);
    }

    #[tokio::test]
    async fn retry_fulfills_lines_after_restock() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", "LAB04", 10.0, expiry(2026, 1, 1)).await;

        let request = seed_request(
            &pool,
            "LAB04",
            vec![
                input_line(Category::Chemical, "Acetone", 5.0),
                input_line(Category::Chemical, "Ethanol", 5.0),
            ],
        )
        .await;

        let (status, _) = fulfill_request(&pool, &request, true, "assistant-1").await.unwrap();
        assert_eq!(status, RequestStatus::PartiallyFulfilled);
        set_request_status(&pool, &request.id, status).await.unwrap();

        seed_lot(&pool, Category::Chemical, "Ethanol", "Ethanol", "LAB04", 10.0, expiry(2026, 1, 1)).await;
        let request = fetch_request(&pool, &request.id).await.unwrap();
        let (status, _) = fulfill_request(&pool, &request, true, "assistant-1").await.unwrap();
        assert_eq!(status, RequestStatus::Fulfilled);
    }
}
