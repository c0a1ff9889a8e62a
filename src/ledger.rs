// src/ledger.rs
//
// Append-only movement log. Entries are written inside the caller's
// transaction, so a failed ledger write rolls the stock change back
// with it and the log can never disagree with the lots.

use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::MovementKind;

pub struct Movement<'a> {
    pub kind: MovementKind,
    pub lot_id: Option<&'a str>,
    pub item_name: &'a str,
    pub quantity: f64,
    pub unit: &'a str,
    pub from_lab_id: Option<&'a str>,
    pub to_lab_id: Option<&'a str>,
    pub actor_id: &'a str,
    pub indent_id: Option<&'a str>,
}

pub async fn record(tx: &mut Transaction<'_, Sqlite>, movement: Movement<'_>) -> ApiResult<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO ledger_entries
           (id, kind, lot_id, item_name, quantity, unit, from_lab_id, to_lab_id,
            actor_id, indent_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
    )
    .bind(&id)
    .bind(movement.kind)
    .bind(movement.lot_id)
    .bind(movement.item_name)
    .bind(movement.quantity)
    .bind(movement.unit)
    .bind(movement.from_lab_id)
    .bind(movement.to_lab_id)
    .bind(movement.actor_id)
    .bind(movement.indent_id)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::CENTRAL_LAB;

    #[tokio::test]
    async fn record_appends_one_row() {
        let pool = db::test_pool().await;
        let mut tx = pool.begin().await.unwrap();
        record(
            &mut tx,
            Movement {
                kind: MovementKind::Entry,
                lot_id: None,
                item_name: "Acetone",
                quantity: 10.0,
                unit: "ml",
                from_lab_id: None,
                to_lab_id: Some(CENTRAL_LAB),
                actor_id: "admin-1",
                indent_id: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
