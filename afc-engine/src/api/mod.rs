//! HTTP API handlers

pub mod health;
pub mod import;
pub mod leads;
pub mod merge;
pub mod sweep;
pub mod tasks;

pub use health::health_routes;
pub use import::import_routes;
pub use leads::lead_routes;
pub use merge::merge_routes;
pub use sweep::sweep_routes;
pub use tasks::task_routes;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ApiResult};

/// Decode a JSON request body
///
/// Decoding errors are answered as `invalid-argument` like any other
/// validation failure.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    if body.is_empty() {
        return Err(ApiError::InvalidArgument("request body is required".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidArgument(format!("malformed request: {}", e)))
}
