//! Task Reconciler
//!
//! Applies [`TaskIntent`]s from the AFC policy against the task store, inside
//! the caller's transaction. Matching is by typed task kind. Every intent is
//! idempotent: re-applying it against already-settled tasks changes nothing.

use afc_common::db::tasks;
use afc_common::events::ChangeEvent;
use afc_common::model::{Lead, Task, TaskKind, TaskNature};
use afc_common::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::policy::TaskIntent;

/// Task mutations performed in one unit, announced after commit
#[derive(Debug, Default, Clone)]
pub struct TaskChanges {
    pub created: Vec<Task>,
    /// (before, after) pairs of tasks that were completed or rescheduled
    pub updated: Vec<(Task, Task)>,
    pub deleted: Vec<Task>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn extend(&mut self, other: TaskChanges) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
    }

    pub fn completed_count(&self) -> usize {
        self.updated
            .iter()
            .filter(|(before, after)| !before.completed && after.completed)
            .count()
    }

    /// One `TaskChanged` event per mutation
    pub fn into_events(self) -> Vec<ChangeEvent> {
        let created = self.created.into_iter().map(|t| ChangeEvent::TaskChanged {
            before: None,
            after: Some(Box::new(t)),
        });
        let updated = self
            .updated
            .into_iter()
            .map(|(before, after)| ChangeEvent::task_updated(before, after));
        let deleted = self.deleted.into_iter().map(|t| ChangeEvent::TaskChanged {
            before: Some(Box::new(t)),
            after: None,
        });
        created.chain(updated).chain(deleted).collect()
    }
}

/// Apply `intents` in order for `lead`
pub async fn apply_intents(
    conn: &mut SqliteConnection,
    lead: &Lead,
    intents: &[TaskIntent],
    now: DateTime<Utc>,
) -> Result<TaskChanges> {
    let mut changes = TaskChanges::default();

    for intent in intents {
        match intent {
            TaskIntent::CompleteOpenInteractive => {
                complete_open_interactive(conn, lead, &mut changes).await?;
            }
            TaskIntent::DeleteFollowUps => {
                delete_open_where(conn, lead, &mut changes, |t| t.kind.is_follow_up()).await?;
            }
            TaskIntent::DeleteEventTasks { event_type } => {
                delete_open_where(conn, lead, &mut changes, |t| {
                    t.kind.is_event_task_for(event_type)
                })
                .await?;
            }
            TaskIntent::CreateFollowUp { step, .. } => {
                // A redelivered decision must not leave two follow-ups for one step
                let open = tasks::open_tasks_for_lead(conn, &lead.id).await?;
                if open.iter().any(|t| t.kind == TaskKind::FollowUp { step: *step }) {
                    tracing::debug!(lead_id = %lead.id, step, "Follow-up already open, not creating another");
                    continue;
                }
                create_from_intent(conn, lead, intent, now, &mut changes).await?;
            }
            TaskIntent::CreateScheduledFollowUp { .. } | TaskIntent::CreateProcedural { .. } => {
                create_from_intent(conn, lead, intent, now, &mut changes).await?;
            }
        }
    }

    Ok(changes)
}

async fn complete_open_interactive(
    conn: &mut SqliteConnection,
    lead: &Lead,
    changes: &mut TaskChanges,
) -> Result<()> {
    for task in tasks::open_tasks_for_lead(conn, &lead.id).await? {
        if task.nature != TaskNature::Interactive {
            continue;
        }
        if tasks::complete_task_if_open(conn, &task.id).await? {
            tracing::debug!(lead_id = %lead.id, task_id = %task.id, "Completed interactive task");
            let mut after = task.clone();
            after.completed = true;
            changes.updated.push((task, after));
        }
    }
    Ok(())
}

async fn delete_open_where<F>(
    conn: &mut SqliteConnection,
    lead: &Lead,
    changes: &mut TaskChanges,
    predicate: F,
) -> Result<()>
where
    F: Fn(&Task) -> bool,
{
    for task in tasks::open_tasks_for_lead(conn, &lead.id).await? {
        if !predicate(&task) {
            continue;
        }
        if tasks::delete_task(conn, &task.id).await? {
            tracing::debug!(
                lead_id = %lead.id,
                task_id = %task.id,
                description = %task.description,
                "Deleted superseded task"
            );
            changes.deleted.push(task);
        }
    }
    Ok(())
}

/// The task a create intent stands for, not yet stored
pub fn task_from_intent(lead: &Lead, intent: &TaskIntent, now: DateTime<Utc>) -> Option<Task> {
    let (kind, description) = intent.task_template()?;
    let due = match intent {
        TaskIntent::CreateFollowUp { due, .. } | TaskIntent::CreateScheduledFollowUp { due } => {
            Some(*due)
        }
        TaskIntent::CreateProcedural { due, .. } => *due,
        _ => None,
    };
    Some(Task::new(lead.id.clone(), lead.name.clone(), kind, description, due, now))
}

async fn create_from_intent(
    conn: &mut SqliteConnection,
    lead: &Lead,
    intent: &TaskIntent,
    now: DateTime<Utc>,
    changes: &mut TaskChanges,
) -> Result<()> {
    let Some(task) = task_from_intent(lead, intent, now) else {
        return Ok(());
    };
    tasks::insert_task(conn, &task).await?;
    tracing::debug!(
        lead_id = %lead.id,
        task_id = %task.id,
        nature = %task.nature,
        description = %task.description,
        "Created task"
    );
    changes.created.push(task);
    Ok(())
}
