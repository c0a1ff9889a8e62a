// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Item masters: historical intake records, one per purchased lot.
    // Quantity here is the quantity at intake, not current stock.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_masters (
            id TEXT PRIMARY KEY,
            internal_name TEXT NOT NULL CHECK(length(internal_name) > 0 AND length(internal_name) <= 255),
            display_name TEXT NOT NULL CHECK(length(display_name) > 0 AND length(display_name) <= 255),
            category TEXT NOT NULL CHECK(category IN ('chemical', 'glassware', 'other')),
            quantity REAL NOT NULL CHECK(quantity >= 0),
            unit TEXT NOT NULL CHECK(length(unit) > 0 AND length(unit) <= 20),
            expiry_date DATETIME NOT NULL,
            batch_id TEXT NOT NULL,
            vendor TEXT CHECK(vendor IS NULL OR length(vendor) <= 255),
            price_per_unit REAL CHECK(price_per_unit IS NULL OR price_per_unit >= 0),
            department TEXT CHECK(department IS NULL OR length(department) <= 255),
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Stock lots: the authoritative live quantity per item identity and
    // location. One row per (master, lab) pair.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_lots (
            id TEXT PRIMARY KEY,
            master_id TEXT NOT NULL,
            category TEXT NOT NULL CHECK(category IN ('chemical', 'glassware', 'other')),
            internal_name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            unit TEXT NOT NULL CHECK(length(unit) > 0 AND length(unit) <= 20),
            lab_id TEXT NOT NULL,
            quantity REAL NOT NULL CHECK(quantity >= 0),
            original_quantity REAL NOT NULL CHECK(original_quantity >= 0),
            expiry_date DATETIME NOT NULL,
            is_allocated INTEGER NOT NULL DEFAULT 0 CHECK(is_allocated IN (0, 1)),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (master_id) REFERENCES item_masters (id) ON DELETE CASCADE,
            UNIQUE(master_id, lab_id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Serialized equipment units, one row per physical item tag.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS equipment_items (
            id TEXT PRIMARY KEY,
            item_tag TEXT NOT NULL UNIQUE,
            product_name TEXT NOT NULL CHECK(length(product_name) > 0 AND length(product_name) <= 255),
            variant TEXT CHECK(variant IS NULL OR length(variant) <= 100),
            unit TEXT CHECK(unit IS NULL OR length(unit) <= 20),
            lab_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'available' CHECK(status IN ('available', 'issued')),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Append-only movement ledger. Rows are never updated or deleted.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT PRIMARY KEY,
            lot_id TEXT,
            item_name TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('entry', 'issue', 'allocation', 'transfer', 'purchase')),
            quantity REAL NOT NULL CHECK(quantity > 0),
            unit TEXT NOT NULL,
            from_lab_id TEXT,
            to_lab_id TEXT,
            actor_id TEXT NOT NULL,
            indent_id TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Unified out-of-stock registry (one row per display name and category).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS out_of_stock (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            category TEXT NOT NULL CHECK(category IN ('chemical', 'glassware', 'other')),
            unit TEXT NOT NULL,
            last_depleted_at DATETIME NOT NULL,
            UNIQUE(display_name, category)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Audit rows for administrative expired-lot actions.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expired_stock_log (
            id TEXT PRIMARY KEY,
            lot_id TEXT NOT NULL,
            master_id TEXT,
            item_name TEXT NOT NULL,
            unit TEXT NOT NULL,
            quantity REAL NOT NULL CHECK(quantity >= 0),
            expiry_date DATETIME NOT NULL,
            lab_id TEXT NOT NULL,
            reason TEXT CHECK(reason IS NULL OR length(reason) <= 500),
            removed_by TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Procurement indents and their lines / comment threads.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indents (
            id TEXT PRIMARY KEY,
            created_by TEXT NOT NULL,
            created_by_role TEXT NOT NULL CHECK(created_by_role IN ('lab_assistant', 'central_admin')),
            lab_id TEXT,
            vendor_name TEXT CHECK(vendor_name IS NULL OR length(vendor_name) <= 255),
            total_price REAL CHECK(total_price IS NULL OR total_price >= 0),
            status TEXT NOT NULL CHECK(status IN (
                'draft', 'pending', 'approved', 'allocated', 'purchasing',
                'purchased', 'rejected', 'fulfilled', 'partially_fulfilled'
            )),
            submitted_at DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indent_lines (
            id TEXT PRIMARY KEY,
            indent_id TEXT NOT NULL,
            item_name TEXT NOT NULL CHECK(length(item_name) > 0 AND length(item_name) <= 255),
            quantity REAL NOT NULL CHECK(quantity > 0),
            unit TEXT NOT NULL,
            price_per_unit REAL CHECK(price_per_unit IS NULL OR price_per_unit >= 0),
            remarks TEXT CHECK(remarks IS NULL OR length(remarks) <= 500),
            is_allocated INTEGER NOT NULL DEFAULT 0 CHECK(is_allocated IN (0, 1)),
            allocated_quantity REAL NOT NULL DEFAULT 0 CHECK(allocated_quantity >= 0),
            failure_reason TEXT,
            FOREIGN KEY (indent_id) REFERENCES indents (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indent_comments (
            id TEXT PRIMARY KEY,
            indent_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            author_role TEXT NOT NULL,
            body TEXT NOT NULL CHECK(length(body) > 0 AND length(body) <= 1000),
            created_at DATETIME NOT NULL,
            FOREIGN KEY (indent_id) REFERENCES indents (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Experiment consumption requests.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            lab_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN (
                'pending', 'approved', 'rejected', 'fulfilled', 'partially_fulfilled'
            )),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS request_experiments (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            experiment_name TEXT NOT NULL CHECK(length(experiment_name) > 0 AND length(experiment_name) <= 255),
            scheduled_date DATETIME NOT NULL,
            session TEXT NOT NULL CHECK(session IN ('morning', 'afternoon')),
            FOREIGN KEY (request_id) REFERENCES requests (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS request_lines (
            id TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL,
            category TEXT NOT NULL CHECK(category IN ('chemical', 'glassware', 'other')),
            item_name TEXT NOT NULL CHECK(length(item_name) > 0 AND length(item_name) <= 255),
            quantity REAL NOT NULL CHECK(quantity > 0),
            unit TEXT NOT NULL,
            allocated_quantity REAL NOT NULL DEFAULT 0 CHECK(allocated_quantity >= 0),
            is_allocated INTEGER NOT NULL DEFAULT 0 CHECK(is_allocated IN (0, 1)),
            allocated_by TEXT,
            allocated_at DATETIME,
            FOREIGN KEY (experiment_id) REFERENCES request_experiments (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== CREATE INDEXES ====================

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_stock_lots_display ON stock_lots(display_name, lab_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_stock_lots_lab ON stock_lots(lab_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_stock_lots_expiry ON stock_lots(expiry_date)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_masters_display ON item_masters(display_name)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_masters_batch ON item_masters(batch_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_lot ON ledger_entries(lot_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_kind ON ledger_entries(kind)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_created ON ledger_entries(created_at)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_equipment_tag ON equipment_items(item_tag)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_equipment_lab ON equipment_items(lab_id, status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_indents_status ON indents(status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_indent_lines_indent ON indent_lines(indent_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_request_lines_exp ON request_lines(experiment_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_oos_name ON out_of_stock(display_name, category)")
        .execute(pool).await;

    Ok(())
}

// ==================== DATABASE RESET (DEVELOPMENT ONLY) ====================

pub async fn reset_database(pool: &SqlitePool) -> Result<()> {
    log::warn!("Resetting database - all data will be lost!");

    let drop_queries = [
        "DROP TABLE IF EXISTS request_lines",
        "DROP TABLE IF EXISTS request_experiments",
        "DROP TABLE IF EXISTS requests",
        "DROP TABLE IF EXISTS indent_comments",
        "DROP TABLE IF EXISTS indent_lines",
        "DROP TABLE IF EXISTS indents",
        "DROP TABLE IF EXISTS expired_stock_log",
        "DROP TABLE IF EXISTS out_of_stock",
        "DROP TABLE IF EXISTS ledger_entries",
        "DROP TABLE IF EXISTS equipment_items",
        "DROP TABLE IF EXISTS stock_lots",
        "DROP TABLE IF EXISTS item_masters",
    ];

    for query in drop_queries.iter() {
        let _ = sqlx::query(query).execute(pool).await;
    }

    run_migrations(pool).await?;

    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    // A single connection keeps the in-memory database alive and shared
    // across the whole test.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.expect("second run");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "item_masters",
            "stock_lots",
            "equipment_items",
            "ledger_entries",
            "out_of_stock",
            "indents",
            "indent_lines",
            "requests",
            "request_lines",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn negative_quantity_rejected_by_schema() {
        let pool = test_pool().await;

        let result = sqlx::query(
            r#"INSERT INTO stock_lots (
                id, master_id, category, internal_name, display_name, unit,
                lab_id, quantity, original_quantity, expiry_date, is_allocated,
                created_at, updated_at
            ) VALUES ('l1', 'm1', 'chemical', 'X', 'X', 'g', 'central-store',
                      -1.0, 10.0, '2030-01-01', 0, datetime('now'), datetime('now'))"#,
        )
        .execute(&pool)
        .await;

        assert!(result.is_err());
    }
}
