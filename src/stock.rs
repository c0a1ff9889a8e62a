// src/stock.rs
//
// Stock record store. Every quantity-changing statement is conditioned
// on a minimum-quantity guard so concurrent writers can never drive a
// lot negative; callers treat a zero-row update as a conflict.

use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use tracing::error;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{Category, StockLot};

/// All live lots for a display name at one location, earliest expiry
/// first. This ordering is what makes allocation FIFO.
pub async fn find_lots_fifo(
    tx: &mut Transaction<'_, Sqlite>,
    category: Category,
    display_name: &str,
    lab_id: &str,
) -> ApiResult<Vec<StockLot>> {
    let lots = sqlx::query_as::<_, StockLot>(
        r#"SELECT * FROM stock_lots
           WHERE display_name = ?1 AND category = ?2 AND lab_id = ?3 AND quantity > 0
           ORDER BY expiry_date ASC, id ASC"#,
    )
    .bind(display_name)
    .bind(category)
    .bind(lab_id)
    .fetch_all(&mut **tx)
    .await?;

    // Exactly one lot may own the unsuffixed name. More than one means
    // a broken sibling set; refuse to draw until a reindex repairs it.
    let unsuffixed = lots.iter().filter(|l| l.internal_name == l.display_name).count();
    if unsuffixed > 1 {
        error!(display_name = %display_name, lab_id = %lab_id, "multiple lots claim the unsuffixed name");
        return Err(ApiError::IntegrityError(format!(
            "Multiple lots claim the name '{}' at {}",
            display_name, lab_id
        )));
    }

    Ok(lots)
}

pub async fn get_lot(
    tx: &mut Transaction<'_, Sqlite>,
    lot_id: &str,
) -> ApiResult<Option<StockLot>> {
    let lot = sqlx::query_as::<_, StockLot>("SELECT * FROM stock_lots WHERE id = ?1")
        .bind(lot_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(lot)
}

/// Decrement `quantity` from a lot only if it currently holds at least
/// that much. Returns false when the guard rejected the update, which
/// means another writer got there first.
pub async fn guarded_decrement(
    tx: &mut Transaction<'_, Sqlite>,
    lot_id: &str,
    quantity: f64,
) -> ApiResult<bool> {
    let result = sqlx::query(
        r#"UPDATE stock_lots
           SET quantity = quantity - ?1, updated_at = CURRENT_TIMESTAMP
           WHERE id = ?2 AND quantity >= ?1"#,
    )
    .bind(quantity)
    .bind(lot_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Add quantity to the destination lot for (master, lab), creating the
/// row on first arrival. Insert seeds names, unit and expiry from the
/// source lot and marks the record as lab-held.
pub async fn upsert_destination(
    tx: &mut Transaction<'_, Sqlite>,
    source: &StockLot,
    dest_lab: &str,
    quantity: f64,
) -> ApiResult<String> {
    let updated = sqlx::query(
        r#"UPDATE stock_lots
           SET quantity = quantity + ?1, updated_at = CURRENT_TIMESTAMP
           WHERE master_id = ?2 AND lab_id = ?3"#,
    )
    .bind(quantity)
    .bind(&source.master_id)
    .bind(dest_lab)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() > 0 {
        let (id,): (String,) =
            sqlx::query_as("SELECT id FROM stock_lots WHERE master_id = ?1 AND lab_id = ?2")
                .bind(&source.master_id)
                .bind(dest_lab)
                .fetch_one(&mut **tx)
                .await?;
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO stock_lots
           (id, master_id, category, internal_name, display_name, unit, lab_id,
            quantity, original_quantity, expiry_date, is_allocated, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9, 1, ?10, ?10)"#,
    )
    .bind(&id)
    .bind(&source.master_id)
    .bind(source.category)
    .bind(&source.internal_name)
    .bind(&source.display_name)
    .bind(&source.unit)
    .bind(dest_lab)
    .bind(quantity)
    .bind(source.expiry_date)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    // The copied internal name may be stale; rebuild the destination's
    // sibling set so each location keeps one unsuffixed owner.
    crate::naming::reindex_display_name(tx, &source.display_name, source.category, dest_lab)
        .await?;

    Ok(id)
}

pub async fn delete_lot(tx: &mut Transaction<'_, Sqlite>, lot_id: &str) -> ApiResult<()> {
    sqlx::query("DELETE FROM stock_lots WHERE id = ?1")
        .bind(lot_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Sibling lots with stock remaining: same display name, same location,
/// excluding the given lot.
pub async fn live_siblings(
    tx: &mut Transaction<'_, Sqlite>,
    lot: &StockLot,
) -> ApiResult<Vec<StockLot>> {
    let siblings = sqlx::query_as::<_, StockLot>(
        r#"SELECT * FROM stock_lots
           WHERE display_name = ?1 AND category = ?2 AND lab_id = ?3
             AND quantity > 0 AND id != ?4"#,
    )
    .bind(&lot.display_name)
    .bind(lot.category)
    .bind(&lot.lab_id)
    .bind(&lot.id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(siblings)
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use sqlx::SqlitePool;

    pub fn expiry(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    /// Insert a master plus a live lot, returning (master_id, lot_id).
    pub async fn seed_lot(
        pool: &SqlitePool,
        category: Category,
        internal_name: &str,
        display_name: &str,
        lab_id: &str,
        quantity: f64,
        expiry_date: DateTime<Utc>,
    ) -> (String, String) {
        let master_id = Uuid::new_v4().to_string();
        let lot_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO item_masters
               (id, internal_name, display_name, category, quantity, unit, expiry_date,
                batch_id, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, 'ml', ?6, 'BATCH-TEST-001', ?7, ?7)"#,
        )
        .bind(&master_id)
        .bind(internal_name)
        .bind(display_name)
        .bind(category)
        .bind(quantity)
        .bind(expiry_date)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            r#"INSERT INTO stock_lots
               (id, master_id, category, internal_name, display_name, unit, lab_id,
                quantity, original_quantity, expiry_date, is_allocated, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, 'ml', ?6, ?7, ?7, ?8, 0, ?9, ?9)"#,
        )
        .bind(&lot_id)
        .bind(&master_id)
        .bind(category)
        .bind(internal_name)
        .bind(display_name)
        .bind(lab_id)
        .bind(quantity)
        .bind(expiry_date)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        (master_id, lot_id)
    }

    pub async fn lot_quantity(pool: &SqlitePool, lot_id: &str) -> Option<f64> {
        sqlx::query_as::<_, (f64,)>("SELECT quantity FROM stock_lots WHERE id = ?1")
            .bind(lot_id)
            .fetch_optional(pool)
            .await
            .unwrap()
            .map(|(q,)| q)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db;
    use crate::error::CENTRAL_LAB;

    #[tokio::test]
    async fn fifo_order_is_expiry_ascending() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone - A", "Acetone", CENTRAL_LAB, 5.0, expiry(2026, 6, 1)).await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", CENTRAL_LAB, 5.0, expiry(2025, 1, 1)).await;
        seed_lot(&pool, Category::Chemical, "Acetone - B", "Acetone", CENTRAL_LAB, 5.0, expiry(2026, 12, 1)).await;

        let mut tx = pool.begin().await.unwrap();
        let lots = find_lots_fifo(&mut tx, Category::Chemical, "Acetone", CENTRAL_LAB)
            .await
            .unwrap();
        assert_eq!(lots.len(), 3);
        assert_eq!(lots[0].internal_name, "Acetone");
        assert_eq!(lots[1].internal_name, "Acetone - A");
        assert_eq!(lots[2].internal_name, "Acetone - B");
    }

    #[tokio::test]
    async fn guarded_decrement_rejects_overdraw() {
        let pool = db::test_pool().await;
        let (_, lot_id) =
            seed_lot(&pool, Category::Chemical, "Ethanol", "Ethanol", CENTRAL_LAB, 10.0, expiry(2025, 1, 1)).await;

        let mut tx = pool.begin().await.unwrap();
        assert!(guarded_decrement(&mut tx, &lot_id, 8.0).await.unwrap());
        assert!(!guarded_decrement(&mut tx, &lot_id, 8.0).await.unwrap());
        assert!(guarded_decrement(&mut tx, &lot_id, 2.0).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(lot_quantity(&pool, &lot_id).await, Some(0.0));
    }

    #[tokio::test]
    async fn duplicate_unsuffixed_names_refuse_to_draw() {
        let pool = db::test_pool().await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", CENTRAL_LAB, 5.0, expiry(2025, 1, 1)).await;
        seed_lot(&pool, Category::Chemical, "Acetone", "Acetone", CENTRAL_LAB, 5.0, expiry(2026, 1, 1)).await;

        let mut tx = pool.begin().await.unwrap();
        let result = find_lots_fifo(&mut tx, Category::Chemical, "Acetone", CENTRAL_LAB).await;
        assert!(matches!(result, Err(ApiError::IntegrityError(_))));
    }

    #[tokio::test]
    async fn upsert_destination_increments_existing_row() {
        let pool = db::test_pool().await;
        let (_, lot_id) =
            seed_lot(&pool, Category::Glassware, "Beaker 250ml", "Beaker 250ml", CENTRAL_LAB, 40.0, expiry(2030, 1, 1)).await;

        let mut tx = pool.begin().await.unwrap();
        let source = get_lot(&mut tx, &lot_id).await.unwrap().unwrap();
        let first = upsert_destination(&mut tx, &source, "LAB01", 10.0).await.unwrap();
        let second = upsert_destination(&mut tx, &source, "LAB01", 5.0).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(lot_quantity(&pool, &first).await, Some(15.0));
    }
}
