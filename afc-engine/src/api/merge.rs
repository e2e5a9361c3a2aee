//! Merge endpoint

use afc_common::LeadId;
use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use serde::Deserialize;

use super::parse_body;
use crate::error::ApiResult;
use crate::merge::MergeReport;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[serde(default)]
    pub primary_id: String,
    #[serde(default)]
    pub secondary_id: String,
}

/// POST /api/merge
pub async fn merge_leads(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<MergeReport>> {
    let request: MergeRequest = parse_body(&body)?;
    let report = state
        .merge
        .merge(&LeadId::from(request.primary_id), &LeadId::from(request.secondary_id))
        .await?;
    Ok(Json(report))
}

/// Build merge routes
pub fn merge_routes() -> Router<AppState> {
    Router::new().route("/api/merge", post(merge_leads))
}
