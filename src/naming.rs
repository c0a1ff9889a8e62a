// src/naming.rs
//
// Batch identity resolver. Multiple live lots may share a display name
// while differing in expiry date; the internal name carries an
// alphabetic suffix (" - A", " - B", ...) so lots stay distinguishable.
// The earliest-expiry lot always owns the unsuffixed name. Any
// structural change (lot added, lot deleted) reindexes the whole
// sibling set rather than patching incrementally, which keeps the
// operation idempotent.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;

use crate::error::{ApiError, ApiResult, CENTRAL_LAB};
use crate::models::Category;

/// Unsuffixed lot plus suffixes A through Z.
pub const MAX_SIBLING_LOTS: usize = 27;

lazy_static! {
    static ref SUFFIX_RE: Regex = Regex::new(r"^(.*) - ([A-Z])$").unwrap();
}

// ==================== PURE HELPERS ====================

/// Strip a trailing " - X" suffix, returning the clean display name.
pub fn display_name_of(internal_name: &str) -> String {
    match SUFFIX_RE.captures(internal_name) {
        Some(caps) => caps[1].to_string(),
        None => internal_name.to_string(),
    }
}

/// Internal name for the lot at `index` within its sibling set
/// (expiry-ascending). Index 0 owns the unsuffixed name.
pub fn internal_name_for_index(display_name: &str, index: usize) -> ApiResult<String> {
    match index {
        0 => Ok(display_name.to_string()),
        1..=26 => {
            let letter = (b'A' + (index as u8 - 1)) as char;
            Ok(format!("{} - {}", display_name, letter))
        }
        _ => Err(ApiError::suffix_space_exhausted(display_name)),
    }
}

/// Compute the full rename plan for a sibling set. `lots` is
/// (lot_id, expiry_date), in any order; the result pairs each lot id
/// with its new internal name, earliest expiry first.
pub fn plan_reindex(
    display_name: &str,
    lots: &[(String, DateTime<Utc>)],
) -> ApiResult<Vec<(String, String)>> {
    let mut sorted: Vec<&(String, DateTime<Utc>)> = lots.iter().collect();
    sorted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    sorted
        .iter()
        .enumerate()
        .map(|(i, (id, _))| Ok((id.clone(), internal_name_for_index(display_name, i)?)))
        .collect()
}

// ==================== DB OPERATIONS ====================

/// Reassign internal names for every live lot sharing a display name at
/// one location, earliest expiry unsuffixed. Central-store reindexes
/// also propagate the new names to the item master rows so historical
/// lookups stay consistent.
pub async fn reindex_display_name(
    tx: &mut Transaction<'_, Sqlite>,
    display_name: &str,
    category: Category,
    lab_id: &str,
) -> ApiResult<()> {
    let lots: Vec<(String, String, DateTime<Utc>)> = sqlx::query_as(
        r#"SELECT id, master_id, expiry_date FROM stock_lots
           WHERE display_name = ?1 AND category = ?2 AND lab_id = ?3"#,
    )
    .bind(display_name)
    .bind(category)
    .bind(lab_id)
    .fetch_all(&mut **tx)
    .await?;

    let keyed: Vec<(String, DateTime<Utc>)> =
        lots.iter().map(|(id, _, expiry)| (id.clone(), *expiry)).collect();
    let masters: HashMap<&str, &str> = lots
        .iter()
        .map(|(id, master_id, _)| (id.as_str(), master_id.as_str()))
        .collect();

    for (lot_id, internal_name) in plan_reindex(display_name, &keyed)? {
        sqlx::query(
            "UPDATE stock_lots SET internal_name = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        )
        .bind(&internal_name)
        .bind(&lot_id)
        .execute(&mut **tx)
        .await?;
        // Masters record the central store's naming; lab-side reindexes
        // keep their hands off them.
        if lab_id != CENTRAL_LAB {
            continue;
        }
        if let Some(master_id) = masters.get(lot_id.as_str()).copied() {
            sqlx::query(
                "UPDATE item_masters SET internal_name = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            )
            .bind(&internal_name)
            .bind(master_id)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Count live sibling lots for a display name at one location.
pub async fn sibling_count(
    tx: &mut Transaction<'_, Sqlite>,
    display_name: &str,
    category: Category,
    lab_id: &str,
) -> ApiResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM stock_lots WHERE display_name = ?1 AND category = ?2 AND lab_id = ?3",
    )
    .bind(display_name)
    .bind(category)
    .bind(lab_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count)
}
