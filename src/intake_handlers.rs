// src/intake_handlers.rs
//
// Central-store intake: new purchased lots arrive, get a batch id, and
// either replenish an identical existing lot or create a fresh
// master + live lot under the suffix naming scheme. Also the
// administrative endpoints for expired lots.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use rand::Rng;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::allocation;
use crate::error::{validate_quantity, validate_unit, ApiError, ApiResult, CENTRAL_LAB};
use crate::handlers::{actor_from_request, ApiResponse};
use crate::ledger::{self, Movement};
use crate::models::{
    Category, ExpiredAction, ExpiredStockLog, IntakeLine, IntakeLineResult, IntakeRequest,
    IntakeResponse, MovementKind, StockLot,
};
use crate::naming;
use crate::stock;
use crate::AppState;

// ==================== BATCH ID ====================

/// Batch ids look like BATCH-20250614-482. Collisions are retried a
/// few times before giving up.
async fn generate_batch_id(pool: &SqlitePool) -> ApiResult<String> {
    for _ in 0..10 {
        let suffix: u32 = rand::thread_rng().gen_range(100..1000);
        let candidate = format!("BATCH-{}-{}", Utc::now().format("%Y%m%d"), suffix);
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM item_masters WHERE batch_id = ?1")
                .bind(&candidate)
                .fetch_one(pool)
                .await?;
        if count == 0 {
            return Ok(candidate);
        }
    }
    Err(ApiError::InternalServerError(
        "Could not generate a unique batch id".to_string(),
    ))
}

async fn previous_batch_id(pool: &SqlitePool) -> ApiResult<String> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT batch_id FROM item_masters ORDER BY created_at DESC, id DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    row.map(|(b,)| b)
        .ok_or_else(|| ApiError::bad_request("No previous batch exists"))
}

// ==================== INTAKE ====================

/// Run a whole intake request in one transaction. Replenishment beats
/// creation: a line whose name, unit, expiry and vendor all match an
/// existing central lot adds to that lot instead of creating a sibling.
/// Regular vendor deliveries log `entry` movements; purchased central
/// indents reuse this path with `purchase` and their indent id.
pub async fn perform_intake(
    pool: &SqlitePool,
    request: &IntakeRequest,
    batch_id: &str,
    actor_id: &str,
    kind: MovementKind,
    indent_id: Option<&str>,
) -> ApiResult<IntakeResponse> {
    let mut tx = pool.begin().await?;
    let mut items = Vec::with_capacity(request.lines.len());

    for line in &request.lines {
        let result =
            intake_line(&mut tx, request.category, line, batch_id, actor_id, kind, indent_id)
                .await?;
        items.push(result);
    }

    tx.commit().await?;
    info!(batch_id = %batch_id, lines = items.len(), "intake committed");

    Ok(IntakeResponse {
        batch_id: batch_id.to_string(),
        items,
    })
}

async fn intake_line(
    tx: &mut Transaction<'_, Sqlite>,
    category: Category,
    line: &IntakeLine,
    batch_id: &str,
    actor_id: &str,
    kind: MovementKind,
    indent_id: Option<&str>,
) -> ApiResult<IntakeLineResult> {
    let display_name = line.name.trim().to_string();
    validate_unit(&line.unit)?;
    validate_quantity(line.quantity)?;
    // A name ending in " - X" would collide with the lot suffix scheme.
    if naming::display_name_of(&display_name) != display_name {
        return Err(ApiError::bad_request(
            "Item names must not end with a lot suffix",
        ));
    }

    // Identical identity means replenishment, not a new lot.
    let existing: Option<StockLot> = sqlx::query_as(
        r#"SELECT sl.* FROM stock_lots sl
           JOIN item_masters im ON im.id = sl.master_id
           WHERE sl.display_name = ?1 AND sl.category = ?2 AND sl.lab_id = ?3
             AND sl.unit = ?4 AND sl.expiry_date = ?5 AND im.vendor IS ?6"#,
    )
    .bind(&display_name)
    .bind(category)
    .bind(CENTRAL_LAB)
    .bind(&line.unit)
    .bind(line.expiry_date)
    .bind(&line.vendor)
    .fetch_optional(&mut **tx)
    .await?;

    let (master_id, internal_name, replenished) = match existing {
        Some(lot) => {
            sqlx::query(
                r#"UPDATE stock_lots
                   SET quantity = quantity + ?1, updated_at = CURRENT_TIMESTAMP
                   WHERE id = ?2"#,
            )
            .bind(line.quantity)
            .bind(&lot.id)
            .execute(&mut **tx)
            .await?;
            sqlx::query(
                r#"UPDATE item_masters
                   SET quantity = quantity + ?1, updated_at = CURRENT_TIMESTAMP
                   WHERE id = ?2"#,
            )
            .bind(line.quantity)
            .bind(&lot.master_id)
            .execute(&mut **tx)
            .await?;
            (lot.master_id.clone(), lot.internal_name.clone(), true)
        }
        None => {
            let siblings =
                naming::sibling_count(tx, &display_name, category, CENTRAL_LAB).await?;
            if siblings as usize >= naming::MAX_SIBLING_LOTS {
                return Err(ApiError::suffix_space_exhausted(&display_name));
            }

            let master_id = Uuid::new_v4().to_string();
            let lot_id = Uuid::new_v4().to_string();
            let now = Utc::now();

            sqlx::query(
                r#"INSERT INTO item_masters
                   (id, internal_name, display_name, category, quantity, unit, expiry_date,
                    batch_id, vendor, price_per_unit, department, created_by, created_at, updated_at)
                   VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)"#,
            )
            .bind(&master_id)
            .bind(&display_name)
            .bind(category)
            .bind(line.quantity)
            .bind(&line.unit)
            .bind(line.expiry_date)
            .bind(batch_id)
            .bind(&line.vendor)
            .bind(line.price_per_unit)
            .bind(&line.department)
            .bind(actor_id)
            .bind(now)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                r#"INSERT INTO stock_lots
                   (id, master_id, category, internal_name, display_name, unit, lab_id,
                    quantity, original_quantity, expiry_date, is_allocated, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7, ?7, ?8, 0, ?9, ?9)"#,
            )
            .bind(&lot_id)
            .bind(&master_id)
            .bind(category)
            .bind(&display_name)
            .bind(&line.unit)
            .bind(CENTRAL_LAB)
            .bind(line.quantity)
            .bind(line.expiry_date)
            .bind(now)
            .execute(&mut **tx)
            .await?;

            // Earliest expiry takes the unsuffixed name, everyone else
            // shifts along.
            naming::reindex_display_name(tx, &display_name, category, CENTRAL_LAB).await?;

            let (internal_name,): (String,) =
                sqlx::query_as("SELECT internal_name FROM stock_lots WHERE id = ?1")
                    .bind(&lot_id)
                    .fetch_one(&mut **tx)
                    .await?;
            (master_id, internal_name, false)
        }
    };

    allocation::on_restock(tx, &display_name, category).await?;

    ledger::record(
        tx,
        Movement {
            kind,
            lot_id: None,
            item_name: &display_name,
            quantity: line.quantity,
            unit: &line.unit,
            from_lab_id: None,
            to_lab_id: Some(CENTRAL_LAB),
            actor_id,
            indent_id,
        },
    )
    .await?;

    Ok(IntakeLineResult {
        display_name,
        internal_name,
        master_id,
        replenished,
        quantity: line.quantity,
    })
}

pub async fn intake_items(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<IntakeRequest>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    body.validate()?;

    let batch_id = if body.use_previous_batch_id {
        previous_batch_id(&app_state.db_pool).await?
    } else {
        generate_batch_id(&app_state.db_pool).await?
    };

    let response = perform_intake(
        &app_state.db_pool,
        &body,
        &batch_id,
        &actor_id,
        MovementKind::Entry,
        None,
    )
    .await?;
    app_state.cache.remove_prefix("stock:").await;

    Ok(HttpResponse::Created().json(ApiResponse::success(response)))
}

// ==================== EXPIRED STOCK ====================

pub async fn list_expired_lots(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let lots = sqlx::query_as::<_, StockLot>(
        r#"SELECT * FROM stock_lots
           WHERE expiry_date < datetime('now')
           ORDER BY expiry_date ASC"#,
    )
    .fetch_all(&app_state.db_pool)
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(lots)))
}

/// Audit trail of expired-lot removals, newest first.
pub async fn list_expired_log(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let entries = sqlx::query_as::<_, ExpiredStockLog>(
        "SELECT * FROM expired_stock_log ORDER BY created_at DESC",
    )
    .fetch_all(&app_state.db_pool)
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}

/// Apply an administrative correction to an expired lot, logging the
/// removal before the lot disappears.
pub async fn process_expired_action(
    pool: &SqlitePool,
    lot_id: &str,
    action: &ExpiredAction,
    actor_id: &str,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;

    let lot = stock::get_lot(&mut tx, lot_id)
        .await?
        .ok_or_else(|| ApiError::lot_not_found(lot_id))?;

    match action {
        ExpiredAction::Merge { merge_to_id, reason } => {
            let target = stock::get_lot(&mut tx, merge_to_id)
                .await?
                .ok_or_else(|| ApiError::lot_not_found(merge_to_id))?;
            if target.display_name != lot.display_name || target.category != lot.category {
                return Err(ApiError::bad_request(
                    "Lots can only be merged under the same display name",
                ));
            }
            sqlx::query(
                r#"UPDATE stock_lots
                   SET quantity = quantity + ?1, updated_at = CURRENT_TIMESTAMP
                   WHERE id = ?2"#,
            )
            .bind(lot.quantity)
            .bind(merge_to_id)
            .execute(&mut *tx)
            .await?;
            log_expired_removal(&mut tx, &lot, reason.as_deref(), actor_id).await?;
            stock::delete_lot(&mut tx, &lot.id).await?;
            naming::reindex_display_name(&mut tx, &lot.display_name, lot.category, &lot.lab_id)
                .await?;
        }
        ExpiredAction::Delete { reason } => {
            log_expired_removal(&mut tx, &lot, reason.as_deref(), actor_id).await?;
            allocation::on_lot_depleted(&mut tx, &lot).await?;
        }
        ExpiredAction::UpdateExpiry { new_expiry_date } => {
            sqlx::query(
                r#"UPDATE stock_lots
                   SET expiry_date = ?1, updated_at = CURRENT_TIMESTAMP
                   WHERE id = ?2"#,
            )
            .bind(new_expiry_date)
            .bind(&lot.id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"UPDATE item_masters
                   SET expiry_date = ?1, updated_at = CURRENT_TIMESTAMP
                   WHERE id = ?2"#,
            )
            .bind(new_expiry_date)
            .bind(&lot.master_id)
            .execute(&mut *tx)
            .await?;
            // Expiry order may have changed under this display name.
            naming::reindex_display_name(&mut tx, &lot.display_name, lot.category, &lot.lab_id)
                .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn log_expired_removal(
    tx: &mut Transaction<'_, Sqlite>,
    lot: &StockLot,
    reason: Option<&str>,
    actor_id: &str,
) -> ApiResult<()> {
    sqlx::query(
        r#"INSERT INTO expired_stock_log
           (id, lot_id, master_id, item_name, unit, quantity, expiry_date, lab_id,
            reason, removed_by, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, CURRENT_TIMESTAMP)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&lot.id)
    .bind(&lot.master_id)
    .bind(&lot.display_name)
    .bind(&lot.unit)
    .bind(lot.quantity)
    .bind(lot.expiry_date)
    .bind(&lot.lab_id)
    .bind(reason)
    .bind(actor_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn expired_lot_action(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ExpiredAction>,
) -> ApiResult<HttpResponse> {
    let actor_id = actor_from_request(&req)?;
    let lot_id = path.into_inner();

    process_expired_action(&app_state.db_pool, &lot_id, &body, &actor_id).await?;
    app_state.cache.remove_prefix("stock:").await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "lot_id": lot_id }),
        "Expired lot processed".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::stock::test_support::*;
    use chrono::{DateTime, TimeZone};

    fn intake_request(category: Category, lines: Vec<IntakeLine>) -> IntakeRequest {
        IntakeRequest {
            category,
            lines,
            use_previous_batch_id: false,
        }
    }

    fn intake_line(name: &str, qty: f64, expiry_date: DateTime<chrono::Utc>) -> IntakeLine {
        IntakeLine {
            name: name.to_string(),
            quantity: qty,
            unit: "ml".to_string(),
            expiry_date,
            vendor: Some("Merck".to_string()),
            price_per_unit: Some(4.5),
            department: None,
        }
    }

    #[tokio::test]
    async fn fresh_intake_creates_master_and_lot() {
        let pool = db::test_pool().await;
        let request = intake_request(
            Category::Chemical,
            vec![intake_line("Acetone", 20.0, expiry(2026, 1, 1))],
        );

        let response = perform_intake(&pool, &request, "BATCH-20250101-111", "admin-1", MovementKind::Entry, None)
            .await
            .unwrap();
        assert_eq!(response.items.len(), 1);
        assert!(!response.items[0].replenished);
        assert_eq!(response.items[0].internal_name, "Acetone");

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM stock_lots WHERE display_name = 'Acetone' AND lab_id = ?1",
        )
        .bind(CENTRAL_LAB)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn earlier_expiry_intake_takes_unsuffixed_name() {
        let pool = db::test_pool().await;
        let first = intake_request(
            Category::Chemical,
            vec![intake_line("Ethanol", 10.0, expiry(2026, 6, 1))],
        );
        perform_intake(&pool, &first, "BATCH-20250101-111", "admin-1", MovementKind::Entry, None)
            .await
            .unwrap();

        let second = intake_request(
            Category::Chemical,
            vec![intake_line("Ethanol", 5.0, expiry(2025, 3, 1))],
        );
        let response = perform_intake(&pool, &second, "BATCH-20250102-222", "admin-1", MovementKind::Entry, None)
            .await
            .unwrap();
        assert_eq!(response.items[0].internal_name, "Ethanol");

        let names: Vec<(String,)> = sqlx::query_as(
            r#"SELECT internal_name FROM stock_lots
               WHERE display_name = 'Ethanol' ORDER BY expiry_date ASC"#,
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(names[0].0, "Ethanol");
        assert_eq!(names[1].0, "Ethanol - A");
    }

    #[tokio::test]
    async fn identical_identity_replenishes_instead_of_creating() {
        let pool = db::test_pool().await;
        let request = intake_request(
            Category::Chemical,
            vec![intake_line("Methanol", 10.0, expiry(2026, 1, 1))],
        );
        perform_intake(&pool, &request, "BATCH-20250101-111", "admin-1", MovementKind::Entry, None)
            .await
            .unwrap();

        let again = intake_request(
            Category::Chemical,
            vec![intake_line("Methanol", 7.0, expiry(2026, 1, 1))],
        );
        let response = perform_intake(&pool, &again, "BATCH-20250102-222", "admin-1", MovementKind::Entry, None)
            .await
            .unwrap();
        assert!(response.items[0].replenished);

        let rows: Vec<(f64,)> =
            sqlx::query_as("SELECT quantity FROM stock_lots WHERE display_name = 'Methanol'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 17.0);
    }

    #[tokio::test]
    async fn suffixed_name_is_rejected_at_intake() {
        let pool = db::test_pool().await;
        let request = intake_request(
            Category::Chemical,
            vec![intake_line("Acetone - A", 5.0, expiry(2026, 1, 1))],
        );
        let result = perform_intake(&pool, &request, "BATCH-20250101-111", "admin-1", MovementKind::Entry, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn intake_clears_out_of_stock_entry() {
        let pool = db::test_pool().await;
        sqlx::query(
            r#"INSERT INTO out_of_stock (id, display_name, category, unit, last_depleted_at)
               VALUES ('oos-1', 'Acetone', 'chemical', 'ml', CURRENT_TIMESTAMP)"#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let request = intake_request(
            Category::Chemical,
            vec![intake_line("Acetone", 20.0, expiry(2026, 1, 1))],
        );
        perform_intake(&pool, &request, "BATCH-20250101-111", "admin-1", MovementKind::Entry, None)
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM out_of_stock")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn merge_folds_quantity_and_logs_removal() {
        let pool = db::test_pool().await;
        let (_, old_lot) = seed_lot(&pool, Category::Chemical, "Xylene", "Xylene", CENTRAL_LAB, 4.0, expiry(2024, 1, 1)).await;
        let (_, fresh_lot) = seed_lot(&pool, Category::Chemical, "Xylene - A", "Xylene", CENTRAL_LAB, 10.0, expiry(2026, 1, 1)).await;

        process_expired_action(
            &pool,
            &old_lot,
            &ExpiredAction::Merge {
                merge_to_id: fresh_lot.clone(),
                reason: Some("still usable".to_string()),
            },
            "admin-1",
        )
        .await
        .unwrap();

        assert_eq!(lot_quantity(&pool, &old_lot).await, None);
        assert_eq!(lot_quantity(&pool, &fresh_lot).await, Some(14.0));

        // Survivor inherits the unsuffixed name.
        let (name,): (String,) =
            sqlx::query_as("SELECT internal_name FROM stock_lots WHERE id = ?1")
                .bind(&fresh_lot)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(name, "Xylene");

        let (logged,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM expired_stock_log")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(logged, 1);
    }

    #[tokio::test]
    async fn update_expiry_reorders_suffixes() {
        let pool = db::test_pool().await;
        let (_, l1) = seed_lot(&pool, Category::Chemical, "Hexane", "Hexane", CENTRAL_LAB, 5.0, expiry(2025, 1, 1)).await;
        let (_, l2) = seed_lot(&pool, Category::Chemical, "Hexane - A", "Hexane", CENTRAL_LAB, 5.0, expiry(2026, 1, 1)).await;

        let new_expiry = chrono::Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        process_expired_action(
            &pool,
            &l1,
            &ExpiredAction::UpdateExpiry {
                new_expiry_date: new_expiry,
            },
            "admin-1",
        )
        .await
        .unwrap();

        let (n1,): (String,) = sqlx::query_as("SELECT internal_name FROM stock_lots WHERE id = ?1")
            .bind(&l1)
            .fetch_one(&pool)
            .await
            .unwrap();
        let (n2,): (String,) = sqlx::query_as("SELECT internal_name FROM stock_lots WHERE id = ?1")
            .bind(&l2)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n1, "Hexane - A");
        assert_eq!(n2, "Hexane");
    }
}
