//! Database initialization

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the filter database and its tables
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new filter database: {}", db_path.display());
    } else {
        info!("Opened existing filter database: {}", db_path.display());
    }

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_tables(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database (each connection would otherwise
/// see its own empty database)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_tables(&pool).await?;
    Ok(pool)
}

/// Create the filter tables (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_filter_groups_table(pool).await?;
    create_filters_table(pool).await?;
    create_filter_settings_table(pool).await?;
    Ok(())
}

async fn create_filter_groups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filter_groups (
            filter_group_id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbolic TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            input_type TEXT NOT NULL,
            output_type TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// No foreign key on parent_filter_id: the registry removes subtrees itself
// and loading has to detect rows that point in a loop.
async fn create_filters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filters (
            filter_id INTEGER PRIMARY KEY AUTOINCREMENT,
            filter_group_id INTEGER NOT NULL REFERENCES filter_groups(filter_group_id),
            context_id INTEGER,
            display_name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            is_template INTEGER NOT NULL DEFAULT 0,
            parent_filter_id INTEGER,
            seq INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_filters_parent ON filters(parent_filter_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_filters_group ON filters(filter_group_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_filter_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filter_settings (
            filter_id INTEGER NOT NULL REFERENCES filters(filter_id) ON DELETE CASCADE,
            setting_name TEXT NOT NULL,
            locale TEXT,
            setting_value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_filter_settings_filter ON filter_settings(filter_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
