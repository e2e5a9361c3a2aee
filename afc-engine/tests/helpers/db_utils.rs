//! Database Test Utilities

use afc_common::config::TomlConfig;
use afc_common::db::{init_database, leads, tasks};
use afc_common::events::EventBus;
use afc_common::model::{Lead, Task};
use afc_engine::search_index::NullSearchIndex;
use afc_engine::AppState;
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_afc.db");
    let pool = init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Engine state over `pool` with default configuration and no search push
pub fn create_test_state(pool: SqlitePool) -> AppState {
    create_test_state_with_bus(pool, EventBus::new(1000))
}

/// Same as [`create_test_state`] over a caller-built event bus
pub fn create_test_state_with_bus(pool: SqlitePool, event_bus: EventBus) -> AppState {
    let mut config = TomlConfig::default();
    config.store.max_lock_wait_ms = 2000;
    AppState::new(pool, event_bus, config, Arc::new(NullSearchIndex)).expect("default configuration is valid")
}

pub async fn insert_lead(pool: &SqlitePool, lead: &Lead) {
    let mut conn = pool.acquire().await.unwrap();
    leads::insert_lead(&mut conn, lead).await.unwrap();
}

pub async fn insert_task(pool: &SqlitePool, task: &Task) {
    let mut conn = pool.acquire().await.unwrap();
    tasks::insert_task(&mut conn, task).await.unwrap();
}
