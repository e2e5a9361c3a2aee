//! Lead endpoints
//!
//! Writes here do their lifecycle work in the same transaction: a new lead is
//! initialized as it is inserted, and a payment plan change syncs its
//! reminders as it is saved. The change listener repeats that work as an
//! idempotent no-op and handles the rest (search push, task cleanup).

use afc_common::db::{leads, tasks};
use afc_common::events::ChangeEvent;
use afc_common::model::{
    CommitmentSnapshot, Interaction, InteractionKind, Lead, LeadStatus, PaymentPlan, Phone, Relationship, Task,
};
use afc_common::{time, InteractionId, LeadId};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::parse_body;
use crate::dispatcher::{commit_decision, DispatchOutcome, DispatchSummary};
use crate::error::{ApiError, ApiResult};
use crate::import::normalize::{normalize_email, normalize_name, normalize_phone};
use crate::merge::BulkDeleteReport;
use crate::payment_sync::sync_payment_plan;
use crate::reconciler::TaskChanges;
use crate::utils::retry_on_lock;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phones: Vec<Phone>,
    #[serde(default)]
    pub relationship: Relationship,
    /// Leave unset to have the AFC initialized on insert
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub on_follow_list: bool,
    #[serde(default)]
    pub commitment_snapshot: CommitmentSnapshot,
    #[serde(default)]
    pub payment_plan: Option<PaymentPlan>,
}

/// An interaction as logged by an operator
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInteractionRequest {
    /// Client-chosen id makes retries idempotent
    #[serde(default)]
    pub id: Option<InteractionId>,
    #[serde(flatten)]
    pub kind: InteractionKind,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionResponse {
    pub interaction_id: InteractionId,
    /// "applied" or "duplicate"
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DispatchSummary>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(default)]
    pub ids: Vec<LeadId>,
}

/// POST /api/leads
pub async fn create_lead(State(state): State<AppState>, body: Bytes) -> ApiResult<(StatusCode, Json<Lead>)> {
    let request: CreateLeadRequest = parse_body(&body)?;

    let name = normalize_name(&request.name);
    if name.is_empty() {
        return Err(ApiError::InvalidArgument("name is required".to_string()));
    }
    if let Some(plan) = &request.payment_plan {
        validate_payment_plan(plan)?;
    }

    let mut lead = Lead::new(name, time::now());
    lead.email = request.email.as_deref().and_then(normalize_email);
    lead.phones = normalize_phones(request.phones);
    lead.relationship = request.relationship;
    lead.status = request.status;
    lead.on_follow_list = request.on_follow_list;
    lead.commitment_snapshot = request.commitment_snapshot;
    lead.payment_plan = request.payment_plan;

    let max_wait = state.config.store.max_lock_wait_ms;
    let (lead, changes) = retry_on_lock("create lead", max_wait, || insert_once(&state, &lead)).await?;

    tracing::info!(
        lead_id = %lead.id,
        relationship = %lead.relationship.as_str(),
        status = ?lead.status,
        afc_step = lead.afc_step,
        "Lead created"
    );
    state.event_bus.emit_lossy(ChangeEvent::lead_created(lead.clone()));
    for event in changes.into_events() {
        state.event_bus.emit_lossy(event);
    }

    Ok((StatusCode::CREATED, Json(lead)))
}

/// GET /api/leads/:id
pub async fn get_lead(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Lead>> {
    let id = LeadId::from(id);
    let mut conn = state.db.acquire().await.map_err(afc_common::Error::from)?;
    let lead = leads::load_lead(&mut conn, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("lead {}", id)))?;
    Ok(Json(lead))
}

/// GET /api/leads/:id/tasks
pub async fn list_lead_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Task>>> {
    let id = LeadId::from(id);
    let mut conn = state.db.acquire().await.map_err(afc_common::Error::from)?;
    if leads::load_lead(&mut conn, &id).await?.is_none() {
        return Err(ApiError::NotFound(format!("lead {}", id)));
    }
    Ok(Json(tasks::tasks_for_lead(&mut conn, &id).await?))
}

/// POST /api/leads/:id/interactions
pub async fn log_interaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<InteractionResponse>> {
    let request: LogInteractionRequest = parse_body(&body)?;
    if matches!(request.kind, InteractionKind::MergeNote { .. }) {
        return Err(ApiError::InvalidArgument(
            "merge notes are written by the merge operation".to_string(),
        ));
    }

    let mut interaction = Interaction::new(request.kind, time::now());
    if let Some(id) = request.id {
        interaction.id = id;
    }
    interaction.notes = request.notes;
    let interaction_id = interaction.id.clone();

    let lead_id = LeadId::from(id);
    match state.dispatcher.dispatch(&lead_id, interaction, None).await? {
        DispatchOutcome::Applied(summary) => Ok(Json(InteractionResponse {
            interaction_id,
            result: "applied",
            summary: Some(summary),
        })),
        DispatchOutcome::Duplicate => Ok(Json(InteractionResponse {
            interaction_id,
            result: "duplicate",
            summary: None,
        })),
        DispatchOutcome::LeadNotFound => Err(ApiError::NotFound(format!("lead {}", lead_id))),
        DispatchOutcome::AlreadySettled => Err(ApiError::Internal(
            "dispatch without a task reported it as settled".to_string(),
        )),
    }
}

/// PUT /api/leads/:id/payment-plan
///
/// Body is the full plan, or `null` to remove it.
pub async fn replace_payment_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Lead>> {
    let plan: Option<PaymentPlan> = parse_body(&body)?;
    if let Some(plan) = &plan {
        validate_payment_plan(plan)?;
    }

    let lead_id = LeadId::from(id);
    let max_wait = state.config.store.max_lock_wait_ms;
    let (before, after, changes) = retry_on_lock("replace payment plan", max_wait, || {
        replace_plan_once(&state, &lead_id, plan.clone())
    })
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("lead {}", lead_id)))?;

    let installments = after.payment_plan.as_ref().map_or(0, |p| p.installments.len());
    tracing::info!(
        lead_id = %lead_id,
        installments,
        reminders_created = changes.created.len(),
        reminders_deleted = changes.deleted.len(),
        "Payment plan replaced"
    );
    state
        .event_bus
        .emit_lossy(ChangeEvent::lead_updated(before, after.clone()));
    for event in changes.into_events() {
        state.event_bus.emit_lossy(event);
    }

    Ok(Json(after))
}

/// Insert the lead and start its lifecycle in one transaction
async fn insert_once(state: &AppState, lead: &Lead) -> afc_common::Result<(Lead, TaskChanges)> {
    let now = time::now();
    let mut tx = state.db.begin().await?;
    leads::insert_lead(&mut *tx, lead).await?;

    let mut created = lead.clone();
    let mut changes = match state.dispatcher.policy().initiate(lead, now) {
        Some(decision) => commit_decision(&mut *tx, &mut created, &decision, now).await?,
        None => TaskChanges::default(),
    };
    if created.payment_plan.is_some() {
        changes.extend(sync_payment_plan(&mut *tx, &created, now).await?);
    }
    tx.commit().await?;
    Ok((created, changes))
}

async fn replace_plan_once(
    state: &AppState,
    lead_id: &LeadId,
    plan: Option<PaymentPlan>,
) -> afc_common::Result<Option<(Lead, Lead, TaskChanges)>> {
    let mut tx = state.db.begin().await?;
    let Some(before) = leads::load_lead(&mut *tx, lead_id).await? else {
        return Ok(None);
    };
    let mut after = before.clone();
    after.payment_plan = plan;
    leads::update_lead(&mut *tx, &after).await?;
    let changes = sync_payment_plan(&mut *tx, &after, time::now()).await?;
    tx.commit().await?;
    Ok(Some((before, after, changes)))
}

/// POST /api/leads/bulk-delete
pub async fn bulk_delete(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<BulkDeleteReport>> {
    let request: BulkDeleteRequest = parse_body(&body)?;
    Ok(Json(state.merge.bulk_delete(&request.ids).await?))
}

fn normalize_phones(phones: Vec<Phone>) -> Vec<Phone> {
    let mut seen = HashSet::new();
    phones
        .into_iter()
        .map(|p| Phone {
            number: normalize_phone(&p.number),
            phone_type: p.phone_type,
        })
        .filter(|p| !p.number.is_empty() && seen.insert(p.number.clone()))
        .collect()
}

fn validate_payment_plan(plan: &PaymentPlan) -> ApiResult<()> {
    let mut ids = HashSet::new();
    for installment in &plan.installments {
        if installment.id.as_str().trim().is_empty() {
            return Err(ApiError::InvalidArgument("installment id is required".to_string()));
        }
        if !ids.insert(&installment.id) {
            return Err(ApiError::InvalidArgument(format!(
                "duplicate installment id {}",
                installment.id
            )));
        }
        if !installment.amount.is_finite() || installment.amount < 0.0 {
            return Err(ApiError::InvalidArgument(format!(
                "installment {} has an invalid amount",
                installment.id
            )));
        }
    }
    Ok(())
}

/// Build lead routes
pub fn lead_routes() -> Router<AppState> {
    Router::new()
        .route("/api/leads", post(create_lead))
        .route("/api/leads/bulk-delete", post(bulk_delete))
        .route("/api/leads/:id", get(get_lead))
        .route("/api/leads/:id/tasks", get(list_lead_tasks))
        .route("/api/leads/:id/interactions", post(log_interaction))
        .route("/api/leads/:id/payment-plan", put(replace_payment_plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use afc_common::model::{Installment, InstallmentStatus, PhoneType};
    use afc_common::InstallmentId;

    #[test]
    fn test_phones_normalized_and_deduplicated() {
        let phones = normalize_phones(vec![
            Phone {
                number: "+971 50 123 4567".to_string(),
                phone_type: PhoneType::Calling,
            },
            Phone {
                number: "971-50-123-4567".to_string(),
                phone_type: PhoneType::Chat,
            },
            Phone {
                number: "n/a".to_string(),
                phone_type: PhoneType::Both,
            },
        ]);
        assert_eq!(phones.len(), 1);
        assert_eq!(phones[0].number, "971501234567");
        assert_eq!(phones[0].phone_type, PhoneType::Calling);
    }

    #[test]
    fn test_payment_plan_rejects_duplicate_ids() {
        let installment = Installment {
            id: InstallmentId::from("i1"),
            amount: 100.0,
            due_date: None,
            status: InstallmentStatus::Unpaid,
        };
        let plan = PaymentPlan {
            installments: vec![installment.clone(), installment],
        };
        assert!(matches!(validate_payment_plan(&plan), Err(ApiError::InvalidArgument(_))));
    }

    #[test]
    fn test_interaction_request_accepts_tagged_kinds() {
        let request: LogInteractionRequest = serde_json::from_str(
            r#"{"type": "quickLog", "quickLogType": "Unresponsive", "notes": "no answer"}"#,
        )
        .unwrap();
        assert!(matches!(request.kind, InteractionKind::QuickLog { .. }));
        assert_eq!(request.notes.as_deref(), Some("no answer"));
    }
}
