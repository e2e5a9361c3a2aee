//! Health check endpoint
//!
//! Reports store counts alongside liveness. A non-zero `unstarted_leads`
//! means leads are waiting for the sweep to start their AFC.

use afc_common::db::{leads, tasks};
use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the store cannot be queried
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreHealth>,
    /// Receivers on the change bus; zero means no lifecycle listener
    pub event_subscribers: usize,
    pub sweep: SweepHealth,
    /// Last background failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub leads: i64,
    /// Leads stored without a status, picked up by the next sweep
    pub unstarted_leads: i64,
    pub open_tasks: i64,
}

#[derive(Debug, Serialize)]
pub struct SweepHealth {
    pub enabled: bool,
    pub times: Vec<String>,
}

async fn store_health(state: &AppState) -> afc_common::Result<StoreHealth> {
    let mut conn = state.db.acquire().await?;
    Ok(StoreHealth {
        leads: leads::count_leads(&mut conn).await?,
        unstarted_leads: leads::count_leads_without_status(&mut conn).await?,
        open_tasks: tasks::count_open_tasks(&mut conn).await?,
    })
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let store = match store_health(&state).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not query the store");
            None
        }
    };
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if store.is_some() { "ok" } else { "degraded" }.to_string(),
        module: "afc-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        store,
        event_subscribers: state.event_bus.subscriber_count(),
        sweep: SweepHealth {
            enabled: state.config.sweep.enabled,
            times: state.config.sweep.times.clone(),
        },
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
