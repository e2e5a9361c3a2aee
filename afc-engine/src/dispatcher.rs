//! Interaction Dispatcher
//!
//! Appends one interaction to a lead and applies the AFC policy's decision.
//! The interaction append, the lead field updates and all task mutations are
//! one SQLite transaction, so two interactions racing on the same lead cannot
//! interleave their read-modify-write. Change events go out after commit.

use afc_common::db::{leads, tasks};
use afc_common::events::{ChangeEvent, EventBus};
use afc_common::model::{Interaction, Lead, LeadStatus};
use afc_common::{time, LeadId, Result, TaskId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

use crate::policy::{AfcPolicy, Decision, Rule};
use crate::reconciler::{self, TaskChanges};
use crate::utils::retry_on_lock;

/// What a dispatch did
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Applied(DispatchSummary),
    /// The interaction id is already in the lead's log
    Duplicate,
    /// No lead with that id; nothing was appended
    LeadNotFound,
    /// The task to settle was already completed by someone else
    AlreadySettled,
}

impl DispatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DispatchOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub rule: Rule,
    pub afc_step_before: u8,
    pub afc_step_after: u8,
    pub status_after: Option<LeadStatus>,
    pub tasks_created: usize,
    pub tasks_completed: usize,
    pub tasks_deleted: usize,
}

#[derive(Clone)]
pub struct InteractionDispatcher {
    db: SqlitePool,
    event_bus: EventBus,
    policy: Arc<AfcPolicy>,
    max_lock_wait_ms: u64,
}

impl InteractionDispatcher {
    pub fn new(db: SqlitePool, event_bus: EventBus, policy: Arc<AfcPolicy>, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            event_bus,
            policy,
            max_lock_wait_ms,
        }
    }

    pub fn policy(&self) -> &AfcPolicy {
        &self.policy
    }

    /// Process one interaction for `lead_id`
    ///
    /// With `settle`, the given task is marked completed in the same
    /// transaction; if it was already completed the whole dispatch is skipped.
    pub async fn dispatch(
        &self,
        lead_id: &LeadId,
        interaction: Interaction,
        settle: Option<&TaskId>,
    ) -> Result<DispatchOutcome> {
        let (outcome, events) = retry_on_lock("dispatch interaction", self.max_lock_wait_ms, || {
            self.dispatch_once(lead_id, &interaction, settle)
        })
        .await?;

        for event in events {
            self.event_bus.emit_lossy(event);
        }

        match &outcome {
            DispatchOutcome::Applied(summary) => tracing::info!(
                lead_id = %lead_id,
                interaction_id = %interaction.id,
                rule = %summary.rule,
                afc_step_before = summary.afc_step_before,
                afc_step_after = summary.afc_step_after,
                tasks_created = summary.tasks_created,
                tasks_completed = summary.tasks_completed,
                tasks_deleted = summary.tasks_deleted,
                "Interaction processed"
            ),
            DispatchOutcome::Duplicate => tracing::debug!(
                lead_id = %lead_id,
                interaction_id = %interaction.id,
                "Interaction already in log, ignoring redelivery"
            ),
            DispatchOutcome::LeadNotFound => tracing::warn!(
                lead_id = %lead_id,
                interaction_id = %interaction.id,
                "Interaction references unknown lead, not retried"
            ),
            DispatchOutcome::AlreadySettled => tracing::debug!(
                lead_id = %lead_id,
                "Task already settled, skipping interaction"
            ),
        }

        Ok(outcome)
    }

    /// Event-driven entry point: failures are logged, never raised
    pub async fn dispatch_logged(
        &self,
        lead_id: &LeadId,
        interaction: Interaction,
        settle: Option<&TaskId>,
    ) -> Option<DispatchOutcome> {
        let interaction_id = interaction.id.clone();
        match self.dispatch(lead_id, interaction, settle).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(
                    lead_id = %lead_id,
                    interaction_id = %interaction_id,
                    error = %e,
                    "Failed to process interaction"
                );
                None
            }
        }
    }

    async fn dispatch_once(
        &self,
        lead_id: &LeadId,
        interaction: &Interaction,
        settle: Option<&TaskId>,
    ) -> Result<(DispatchOutcome, Vec<ChangeEvent>)> {
        let now = time::now();
        let mut tx = self.db.begin().await?;
        let mut events = Vec::new();

        if let Some(task_id) = settle {
            let Some(task) = tasks::load_task(&mut *tx, task_id).await? else {
                return Ok((DispatchOutcome::AlreadySettled, events));
            };
            if !tasks::complete_task_if_open(&mut *tx, task_id).await? {
                return Ok((DispatchOutcome::AlreadySettled, events));
            }
            let mut after = task.clone();
            after.completed = true;
            events.push(ChangeEvent::task_updated(task, after));
        }

        let Some(before) = leads::load_lead(&mut *tx, lead_id).await? else {
            // Keep the settle so an orphaned task is not picked up again
            tx.commit().await?;
            return Ok((DispatchOutcome::LeadNotFound, events));
        };

        if before.has_interaction(&interaction.id) {
            return Ok((DispatchOutcome::Duplicate, Vec::new()));
        }

        let decision = self.policy.decide(&before, interaction, now);

        let mut after = before.clone();
        after.interactions.push(interaction.clone());
        after.last_interaction_date = Some(now);
        let changes = commit_decision(&mut *tx, &mut after, &decision, now).await?;

        tx.commit().await?;

        let summary = DispatchSummary {
            rule: decision.rule,
            afc_step_before: before.afc_step,
            afc_step_after: after.afc_step,
            status_after: after.status,
            tasks_created: changes.created.len(),
            tasks_completed: changes.completed_count(),
            tasks_deleted: changes.deleted.len(),
        };

        events.push(ChangeEvent::InteractionAppended {
            lead_id: lead_id.clone(),
            interaction: Box::new(interaction.clone()),
        });
        events.push(ChangeEvent::lead_updated(before, after));
        events.extend(changes.into_events());

        Ok((DispatchOutcome::Applied(summary), events))
    }
}

/// Write a decision's lead deltas and apply its task intents
///
/// `lead` must already carry any other field changes of this unit (appended
/// interaction, timestamps); it is saved once with the decision applied.
pub(crate) async fn commit_decision(
    conn: &mut SqliteConnection,
    lead: &mut Lead,
    decision: &Decision,
    now: DateTime<Utc>,
) -> Result<TaskChanges> {
    decision.apply_to(lead);
    leads::update_lead(conn, lead).await?;
    reconciler::apply_intents(conn, lead, &decision.intents, now).await
}
