//! Database initialization
//!
//! Opens (or creates) the SQLite file and creates the schema. Every statement
//! is idempotent, so initialization is safe on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open the database at `db_path`, creating file and tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets readers proceed while one writer holds the lock
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_leads_table(pool).await?;
    create_tasks_table(pool).await?;
    info!("Database tables initialized (leads, tasks)");
    Ok(())
}

async fn create_leads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            phones TEXT NOT NULL DEFAULT '[]',
            relationship TEXT NOT NULL DEFAULT 'Lead',
            status TEXT,
            afc_step INTEGER NOT NULL DEFAULT 0,
            has_engaged INTEGER NOT NULL DEFAULT 0,
            on_follow_list INTEGER NOT NULL DEFAULT 0,
            interactions TEXT NOT NULL DEFAULT '[]',
            commitment_snapshot TEXT NOT NULL DEFAULT '{}',
            payment_plan TEXT,
            last_interaction_ms INTEGER,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_email ON leads(email)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_cycle ON leads(status, afc_step)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL,
            lead_name TEXT NOT NULL,
            description TEXT NOT NULL,
            nature TEXT NOT NULL,
            kind TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            due_date_ms INTEGER,
            created_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_lead ON tasks(lead_id, completed)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_overdue ON tasks(completed, nature, due_date_ms)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
