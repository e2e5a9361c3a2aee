//! Manual sweep trigger

use afc_common::time;
use axum::{extract::State, routing::post, Json, Router};

use crate::error::ApiResult;
use crate::sweep::SweepReport;
use crate::AppState;

/// POST /api/sweep
pub async fn run_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    let report = state.sweep.run(time::now()).await?;
    Ok(Json(report))
}

/// Build sweep routes
pub fn sweep_routes() -> Router<AppState> {
    Router::new().route("/api/sweep", post(run_sweep))
}
