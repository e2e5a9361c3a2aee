//! Import endpoint

use axum::{body::Bytes, extract::State, routing::post, Json, Router};

use super::parse_body;
use crate::error::ApiResult;
use crate::import::{ImportReport, ImportRequest};
use crate::AppState;

/// POST /api/import
///
/// A batch that fails to commit does not fail the request: the report carries
/// the counts of what was written and the error.
pub async fn run_import(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<ImportReport>> {
    let request: ImportRequest = parse_body(&body)?;
    let report = state.import.import(request).await?;

    if let Some(error) = &report.error {
        *state.last_error.write().await = Some(format!("import: {}", error));
    }
    Ok(Json(report))
}

/// Build import routes
pub fn import_routes() -> Router<AppState> {
    Router::new().route("/api/import", post(run_import))
}
