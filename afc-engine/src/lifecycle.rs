//! Lead lifecycle hooks
//!
//! The engine's side of the change-notification contract:
//! `on_lead_changed(before?, after?)` and `on_task_changed(before?, after?)`.
//! Events can be redelivered or dropped, so every handler re-reads current
//! state and is a no-op when the work was already done.

use afc_common::db::{leads, tasks};
use afc_common::events::{ChangeEvent, EventBus};
use afc_common::model::{Interaction, Lead, QuickLogType, Task, TaskKind};
use afc_common::{time, InteractionId, LeadId, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::dispatcher::{commit_decision, InteractionDispatcher};
use crate::payment_sync::sync_payment_plan;
use crate::reconciler::TaskChanges;
use crate::search_index::{SearchIndex, SearchRecord};
use crate::utils::retry_on_lock;

#[derive(Clone)]
pub struct LeadLifecycle {
    db: SqlitePool,
    event_bus: EventBus,
    dispatcher: InteractionDispatcher,
    search_index: Arc<dyn SearchIndex>,
    max_lock_wait_ms: u64,
}

impl LeadLifecycle {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        dispatcher: InteractionDispatcher,
        search_index: Arc<dyn SearchIndex>,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            event_bus,
            dispatcher,
            search_index,
            max_lock_wait_ms,
        }
    }

    /// Route one change event; errors are logged and swallowed
    pub async fn handle(&self, event: &ChangeEvent) {
        let result = match event {
            ChangeEvent::LeadChanged {
                before,
                after,
                merged_into,
            } => {
                self.on_lead_changed(before.as_deref(), after.as_deref(), merged_into.as_ref())
                    .await
            }
            ChangeEvent::TaskChanged { before, after } => {
                self.on_task_changed(before.as_deref(), after.as_deref()).await
            }
            ChangeEvent::InteractionAppended { lead_id, interaction } => {
                tracing::trace!(lead_id = %lead_id, interaction_id = %interaction.id, "Interaction appended");
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::error!(event = event.label(), error = %e, "Lifecycle hook failed");
        }
    }

    /// Lead created, updated or deleted
    ///
    /// - created: initialize the AFC if the writer did not (no status yet)
    /// - payment plan differs: sync reminder tasks
    /// - deleted: remove the lead's tasks unless a merge retired it
    /// - always: push the search record
    pub async fn on_lead_changed(
        &self,
        before: Option<&Lead>,
        after: Option<&Lead>,
        merged_into: Option<&LeadId>,
    ) -> Result<()> {
        match (before, after) {
            (None, Some(created)) => {
                if created.status.is_none() {
                    self.initiate(&created.id).await?;
                }
                if created.payment_plan.is_some() {
                    self.sync_payments(&created.id).await?;
                }
            }
            (Some(old), Some(new)) => {
                if old.payment_plan != new.payment_plan {
                    self.sync_payments(&new.id).await?;
                }
            }
            (Some(deleted), None) => match merged_into {
                Some(primary) => tracing::debug!(
                    lead_id = %deleted.id,
                    merged_into = %primary,
                    "Lead retired by merge, tasks already reparented"
                ),
                None => self.cascade_delete(&deleted.id).await?,
            },
            (None, None) => {}
        }

        self.push_search(before, after).await;
        Ok(())
    }

    /// Completing an info-request chore restarts the cycle
    ///
    /// The restart interaction's id is derived from the task, so a second
    /// delivery of the same completion is dropped by the dispatcher.
    pub async fn on_task_changed(&self, before: Option<&Task>, after: Option<&Task>) -> Result<()> {
        let (Some(before), Some(after)) = (before, after) else {
            return Ok(());
        };
        if before.completed || !after.completed || after.kind != TaskKind::InfoRequest {
            return Ok(());
        }

        tracing::info!(
            task_id = %after.id,
            lead_id = %after.lead_id,
            "Info task completed, restarting AFC"
        );
        let mut interaction = Interaction::quick_log(QuickLogType::Followup, time::now()).with_notes(
            format!(
                "System generated: AFC reset after completion of task '{}'.",
                after.description
            ),
        );
        interaction.id = InteractionId::from(format!("info-done-{}", after.id));
        self.dispatcher.dispatch(&after.lead_id, interaction, None).await?;
        Ok(())
    }

    async fn initiate(&self, lead_id: &LeadId) -> Result<()> {
        let events = retry_on_lock("initiate lead", self.max_lock_wait_ms, || {
            self.initiate_once(lead_id)
        })
        .await?;

        self.emit_all(events);
        Ok(())
    }

    async fn initiate_once(&self, lead_id: &LeadId) -> Result<Vec<ChangeEvent>> {
        let now = time::now();
        let mut tx = self.db.begin().await?;
        let Some(before) = leads::load_lead(&mut *tx, lead_id).await? else {
            return Ok(Vec::new());
        };
        let Some(decision) = self.dispatcher.policy().initiate(&before, now) else {
            return Ok(Vec::new());
        };

        let mut after = before.clone();
        let changes = commit_decision(&mut *tx, &mut after, &decision, now).await?;
        tx.commit().await?;

        tracing::info!(
            lead_id = %lead_id,
            status = ?after.status,
            afc_step = after.afc_step,
            "AFC initialized for new lead"
        );
        let mut events = vec![ChangeEvent::lead_updated(before, after)];
        events.extend(changes.into_events());
        Ok(events)
    }

    async fn sync_payments(&self, lead_id: &LeadId) -> Result<()> {
        let changes = retry_on_lock("payment plan sync", self.max_lock_wait_ms, || {
            self.sync_payments_once(lead_id)
        })
        .await?;

        if !changes.is_empty() {
            tracing::info!(
                lead_id = %lead_id,
                created = changes.created.len(),
                updated = changes.updated.len(),
                deleted = changes.deleted.len(),
                "Payment reminders synced"
            );
        }
        self.emit_all(changes.into_events());
        Ok(())
    }

    async fn sync_payments_once(&self, lead_id: &LeadId) -> Result<TaskChanges> {
        let mut tx = self.db.begin().await?;
        let Some(lead) = leads::load_lead(&mut *tx, lead_id).await? else {
            return Ok(TaskChanges::default());
        };
        let changes = sync_payment_plan(&mut *tx, &lead, time::now()).await?;
        tx.commit().await?;
        Ok(changes)
    }

    async fn cascade_delete(&self, lead_id: &LeadId) -> Result<()> {
        let removed = retry_on_lock("cascade task delete", self.max_lock_wait_ms, || {
            self.cascade_delete_once(lead_id)
        })
        .await?;

        tracing::info!(lead_id = %lead_id, tasks = removed.len(), "Deleted tasks of removed lead");
        let changes = TaskChanges {
            deleted: removed,
            ..Default::default()
        };
        self.emit_all(changes.into_events());
        Ok(())
    }

    async fn cascade_delete_once(&self, lead_id: &LeadId) -> Result<Vec<Task>> {
        let mut tx = self.db.begin().await?;
        let owned = tasks::tasks_for_lead(&mut *tx, lead_id).await?;
        tasks::delete_tasks_for_lead(&mut *tx, lead_id).await?;
        tx.commit().await?;
        Ok(owned)
    }

    async fn push_search(&self, before: Option<&Lead>, after: Option<&Lead>) {
        let result = match (before, after) {
            (_, Some(lead)) => self.search_index.upsert(&SearchRecord::from(lead)).await,
            (Some(lead), None) => self.search_index.remove(&lead.id).await,
            (None, None) => Ok(()),
        };
        if let Err(e) = result {
            let lead_id = after.or(before).map(|l| l.id.to_string()).unwrap_or_default();
            tracing::warn!(lead_id = %lead_id, error = %e, "Search index push failed");
        }
    }

    fn emit_all(&self, events: Vec<ChangeEvent>) {
        for event in events {
            self.event_bus.emit_lossy(event);
        }
    }
}
