//! Task endpoints

use afc_common::db::tasks;
use afc_common::events::ChangeEvent;
use afc_common::model::Task;
use afc_common::TaskId;
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};

use crate::error::{ApiError, ApiResult};
use crate::utils::retry_on_lock;
use crate::AppState;

/// POST /api/tasks/:id/complete
///
/// Completing an already completed task returns it unchanged. The task hook
/// runs before the response (an info request restarts the lead's cycle); the
/// change event that follows is a harmless redelivery of it.
pub async fn complete_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Task>> {
    let task_id = TaskId::from(id);
    let max_wait = state.config.store.max_lock_wait_ms;

    let (before, after) = retry_on_lock("complete task", max_wait, || complete_once(&state, &task_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))?;

    if before.completed {
        tracing::debug!(task_id = %task_id, "Task already completed");
    } else {
        tracing::info!(task_id = %task_id, lead_id = %after.lead_id, "Task completed by operator");
        state.lifecycle.on_task_changed(Some(&before), Some(&after)).await?;
        state
            .event_bus
            .emit_lossy(ChangeEvent::task_updated(before, after.clone()));
    }

    Ok(Json(after))
}

async fn complete_once(state: &AppState, task_id: &TaskId) -> afc_common::Result<Option<(Task, Task)>> {
    let mut tx = state.db.begin().await?;
    let Some(before) = tasks::load_task(&mut *tx, task_id).await? else {
        return Ok(None);
    };
    let changed = tasks::complete_task_if_open(&mut *tx, task_id).await?;
    tx.commit().await?;

    let mut after = before.clone();
    after.completed = true;
    if !changed {
        return Ok(Some((after.clone(), after)));
    }
    Ok(Some((before, after)))
}

/// Build task routes
pub fn task_routes() -> Router<AppState> {
    Router::new().route("/api/tasks/:id/complete", post(complete_task))
}
