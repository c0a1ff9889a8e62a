// src/allocation.rs
//
// Allocation engine. Moves quantities from central-store lots into lab
// lots in earliest-expiry-first order, inside one transaction per
// batch: if any line fails, nothing is persisted, but the caller still
// gets a per-line report saying what would have happened. Depleted
// source lots are consolidated or parked in the out-of-stock registry
// as a side effect of the same transaction.

use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, CENTRAL_LAB};
use crate::ledger::{self, Movement};
use crate::models::{Category, EquipmentItem, MovementKind, StockLot};
use crate::naming;
use crate::stock;

// ==================== BATCH ALLOCATION ====================

#[derive(Debug, Clone)]
pub struct AllocationLine {
    pub display_name: String,
    pub quantity: f64,
}

#[derive(Debug, Serialize)]
pub struct AllocationOutcome {
    pub display_name: String,
    pub requested_quantity: f64,
    pub allocated_quantity: f64,
    pub success: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AllocationReport {
    /// False means every stock change in this batch was rolled back.
    pub committed: bool,
    pub lines: Vec<AllocationOutcome>,
}

impl AllocationReport {
    pub fn failed_lines(&self) -> impl Iterator<Item = &AllocationOutcome> {
        self.lines.iter().filter(|l| !l.success)
    }
}

/// Allocate a batch of lines from the central store to one lab.
/// All-or-nothing: a single failing line rolls back the whole batch,
/// and the report tells the caller which lines were the problem.
pub async fn allocate(
    pool: &SqlitePool,
    category: Category,
    dest_lab: &str,
    lines: &[AllocationLine],
    actor_id: &str,
    indent_id: Option<&str>,
) -> ApiResult<AllocationReport> {
    if lines.is_empty() {
        return Err(ApiError::bad_request("Allocation batch is empty"));
    }

    let mut tx = pool.begin().await?;
    let mut outcomes = Vec::with_capacity(lines.len());
    let mut batch_ok = true;

    for line in lines {
        let outcome = allocate_line(&mut tx, category, dest_lab, line, actor_id, indent_id).await?;
        if !outcome.success {
            batch_ok = false;
        }
        outcomes.push(outcome);
    }

    if batch_ok {
        tx.commit().await?;
        info!(
            category = %category,
            dest_lab = %dest_lab,
            lines = outcomes.len(),
            "allocation batch committed"
        );
    } else {
        tx.rollback().await?;
        // Nothing persisted; zero out the would-have-succeeded lines so
        // the report reflects actual stock state.
        for outcome in &mut outcomes {
            outcome.allocated_quantity = 0.0;
        }
        warn!(
            category = %category,
            dest_lab = %dest_lab,
            failed = outcomes.iter().filter(|o| !o.success).count(),
            "allocation batch rolled back"
        );
    }

    Ok(AllocationReport {
        committed: batch_ok,
        lines: outcomes,
    })
}

/// One line of the batch. Runs inside the batch transaction and never
/// commits; a failed line is reported, not raised, so the caller can
/// finish collecting diagnostics before rolling back.
async fn allocate_line(
    tx: &mut Transaction<'_, Sqlite>,
    category: Category,
    dest_lab: &str,
    line: &AllocationLine,
    actor_id: &str,
    indent_id: Option<&str>,
) -> ApiResult<AllocationOutcome> {
    let fail = |reason: String| AllocationOutcome {
        display_name: line.display_name.clone(),
        requested_quantity: line.quantity,
        allocated_quantity: 0.0,
        success: false,
        reason: Some(reason),
    };

    if line.quantity <= 0.0 {
        return Ok(fail("Quantity must be positive".to_string()));
    }
    if line.display_name.trim().is_empty() {
        return Ok(fail("Item name is required".to_string()));
    }

    let lots = stock::find_lots_fifo(tx, category, &line.display_name, CENTRAL_LAB).await?;
    if lots.is_empty() {
        return Ok(fail(format!("No stock for '{}'", line.display_name)));
    }

    let available: f64 = lots.iter().map(|l| l.quantity).sum();
    let mut remaining = line.quantity;

    for lot in &lots {
        if remaining <= 0.0 {
            break;
        }
        let take = lot.quantity.min(remaining);

        if !stock::guarded_decrement(tx, &lot.id, take).await? {
            return Ok(fail(format!(
                "Concurrent update on '{}', retry the allocation",
                lot.internal_name
            )));
        }
        remaining -= take;

        let moved = stock::upsert_destination(tx, lot, dest_lab, take).await?;
        ledger::record(
            tx,
            Movement {
                kind: MovementKind::Allocation,
                lot_id: Some(&moved),
                item_name: &line.display_name,
                quantity: take,
                unit: &lot.unit,
                from_lab_id: Some(CENTRAL_LAB),
                to_lab_id: Some(dest_lab),
                actor_id,
                indent_id,
            },
        )
        .await?;

        let refreshed = stock::get_lot(tx, &lot.id).await?;
        if let Some(refreshed) = refreshed {
            if refreshed.quantity <= 0.0 {
                on_lot_depleted(tx, &refreshed).await?;
            }
        }
    }

    if remaining > 0.0 {
        return Ok(fail(
            ApiError::insufficient_stock(&line.display_name, available, line.quantity).to_string(),
        ));
    }

    Ok(AllocationOutcome {
        display_name: line.display_name.clone(),
        requested_quantity: line.quantity,
        allocated_quantity: line.quantity,
        success: true,
        reason: None,
    })
}

// ==================== OUT-OF-STOCK LIFECYCLE ====================

/// Called the moment a lot's quantity reaches zero. With live siblings
/// the lot is consolidated away and the sibling set reindexed; without
/// them the display name is parked in the out-of-stock registry.
pub async fn on_lot_depleted(tx: &mut Transaction<'_, Sqlite>, lot: &StockLot) -> ApiResult<()> {
    let siblings = stock::live_siblings(tx, lot).await?;

    stock::delete_lot(tx, &lot.id).await?;

    if !siblings.is_empty() {
        naming::reindex_display_name(tx, &lot.display_name, lot.category, &lot.lab_id).await?;
    } else if lot.lab_id == CENTRAL_LAB {
        // Labs just lose the row; only central depletion means the item
        // is gone from the institution's supply.
        sqlx::query(
            r#"INSERT INTO out_of_stock (id, display_name, category, unit, last_depleted_at)
               VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
               ON CONFLICT(display_name, category)
               DO UPDATE SET last_depleted_at = CURRENT_TIMESTAMP"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&lot.display_name)
        .bind(lot.category)
        .bind(&lot.unit)
        .execute(&mut **tx)
        .await?;
        info!(display_name = %lot.display_name, lab_id = %lot.lab_id, "item out of stock");
    }

    Ok(())
}

/// Clear the out-of-stock flag for a display name. Called whenever new
/// stock for it lands at the central store.
pub async fn on_restock(
    tx: &mut Transaction<'_, Sqlite>,
    display_name: &str,
    category: Category,
) -> ApiResult<()> {
    sqlx::query("DELETE FROM out_of_stock WHERE display_name = ?1 AND category = ?2")
        .bind(display_name)
        .bind(category)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ==================== SERIALIZED EQUIPMENT ====================

/// Hand a tagged equipment unit to a lab. The status check in the
/// UPDATE doubles as the concurrency guard.
pub async fn issue_equipment_item(
    pool: &SqlitePool,
    item_tag: &str,
    to_lab_id: &str,
    actor_id: &str,
) -> ApiResult<EquipmentItem> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"UPDATE equipment_items
           SET status = 'issued', lab_id = ?1, updated_at = CURRENT_TIMESTAMP
           WHERE item_tag = ?2 AND status = 'available'"#,
    )
    .bind(to_lab_id)
    .bind(item_tag)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM equipment_items WHERE item_tag = ?1")
                .bind(item_tag)
                .fetch_optional(&mut *tx)
                .await?;
        tx.rollback().await?;
        return match exists {
            Some(_) => Err(ApiError::stock_conflict(item_tag)),
            None => Err(ApiError::not_found(&format!("Equipment '{}'", item_tag))),
        };
    }

    let item = sqlx::query_as::<_, EquipmentItem>(
        "SELECT * FROM equipment_items WHERE item_tag = ?1",
    )
    .bind(item_tag)
    .fetch_one(&mut *tx)
    .await?;

    ledger::record(
        &mut tx,
        Movement {
            kind: MovementKind::Issue,
            lot_id: Some(&item.id),
            item_name: &item.product_name,
            quantity: 1.0,
            unit: item.unit.as_deref().unwrap_or("pcs"),
            from_lab_id: Some(CENTRAL_LAB),
            to_lab_id: Some(to_lab_id),
            actor_id,
            indent_id: None,
        },
    )
    .await?;

    tx.commit().await?;
    Ok(item)
}

/// Return an issued unit to the central store.
pub async fn return_equipment_item(
    pool: &SqlitePool,
    item_tag: &str,
    actor_id: &str,
) -> ApiResult<EquipmentItem> {
    let mut tx = pool.begin().await?;

    let before = sqlx::query_as::<_, EquipmentItem>(
        "SELECT * FROM equipment_items WHERE item_tag = ?1",
    )
    .bind(item_tag)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found(&format!("Equipment '{}'", item_tag)))?;

    let result = sqlx::query(
        r#"UPDATE equipment_items
           SET status = 'available', lab_id = ?1, updated_at = CURRENT_TIMESTAMP
           WHERE item_tag = ?2 AND status = 'issued'"#,
    )
    .bind(CENTRAL_LAB)
    .bind(item_tag)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(ApiError::bad_request(&format!(
            "Equipment '{}' is not issued",
            item_tag
        )));
    }

    ledger::record(
        &mut tx,
        Movement {
            kind: MovementKind::Transfer,
            lot_id: Some(&before.id),
            item_name: &before.product_name,
            quantity: 1.0,
            unit: before.unit.as_deref().unwrap_or("pcs"),
            from_lab_id: Some(&before.lab_id),
            to_lab_id: Some(CENTRAL_LAB),
            actor_id,
            indent_id: None,
        },
    )
    .await?;

    tx.commit().await?;

    let item = sqlx::query_as::<_, EquipmentItem>(
        "SELECT * FROM equipment_items WHERE item_tag = ?1",
    )
    .bind(item_tag)
    .fetch_one(pool)
    .await?;
    Ok(item)
}
