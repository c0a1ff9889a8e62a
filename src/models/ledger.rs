// src/models/ledger.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use strum::{Display, EnumString};

// ==================== MOVEMENT LEDGER ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementKind {
    /// Fresh stock arriving at the central store.
    Entry,
    /// Serialized equipment handed out by tag.
    Issue,
    /// Central store to lab quantity movement.
    Allocation,
    /// Lab to faculty (or lab to central return) movement.
    Transfer,
    /// Stock materialized by a purchased central indent.
    Purchase,
}

/// Append-only audit record of one stock movement. Never updated,
/// never deleted; `lot_id` may outlive the lot itself.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct LedgerEntry {
    pub id: String,
    pub lot_id: Option<String>,
    pub item_name: String,
    pub kind: MovementKind,
    pub quantity: f64,
    pub unit: String,
    pub from_lab_id: Option<String>,
    pub to_lab_id: Option<String>,
    pub actor_id: String,
    pub indent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn movement_kind_round_trips_as_text() {
        assert_eq!(MovementKind::Allocation.to_string(), "allocation");
        assert_eq!(MovementKind::from_str("entry").unwrap(), MovementKind::Entry);
        assert!(MovementKind::from_str("refund").is_err());
    }
}
