// src/models/mod.rs

pub mod equipment;
pub mod indent;
pub mod item;
pub mod ledger;
pub mod request;
pub mod stock;

pub use equipment::*;
pub use indent::*;
pub use item::*;
pub use ledger::*;
pub use request::*;
pub use stock::*;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ==================== COMMON / SHARED ====================

/// Consumable category. One allocation engine serves all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Chemical,
    Glassware,
    Other,
}

/// Aggregate counters for the dashboard endpoint.
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_masters: i64,
    pub total_live_lots: i64,
    pub total_equipment: i64,
    pub out_of_stock_count: i64,
    pub pending_indents: i64,
    pub pending_requests: i64,
    pub expiring_within_30_days: i64,
}

/// Per-lab stock summary row for the distribution view.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct LabDistribution {
    pub lab_id: String,
    pub lot_count: i64,
    pub total_quantity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn category_serializes_as_snake_case() {
        assert_eq!(serde_json::to_string(&Category::Chemical).unwrap(), "\"chemical\"");
        assert_eq!(Category::from_str("glassware").unwrap(), Category::Glassware);
        assert_eq!(Category::Other.to_string(), "other");
    }
}
