//! Merge Engine and bulk delete
//!
//! A merge folds a secondary lead into a primary one in a single SQLite
//! transaction: tasks are reparented, the interaction logs are unioned by id,
//! a merge note is appended and the secondary is deleted. The lead-deleted
//! event carries `merged_into`, so the lifecycle hook leaves the (already
//! reparented) tasks alone. A bulk delete removes each lead's tasks in the
//! same transaction as the lead.

use afc_common::db::{leads, tasks};
use afc_common::events::{ChangeEvent, EventBus};
use afc_common::model::{Interaction, InteractionKind, Lead, Task};
use afc_common::{time, Error, LeadId, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::reconciler::TaskChanges;
use crate::utils::retry_on_lock;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub primary: Lead,
    pub merged_lead_id: LeadId,
    pub tasks_reparented: usize,
    /// Open follow-ups of the secondary dropped so the primary keeps one cycle
    pub follow_ups_removed: usize,
    pub interactions_added: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteReport {
    pub deleted: usize,
    /// Tasks removed along with the deleted leads
    pub tasks_deleted: usize,
    pub not_found: Vec<LeadId>,
}

#[derive(Clone)]
pub struct MergeEngine {
    db: SqlitePool,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl MergeEngine {
    pub fn new(db: SqlitePool, event_bus: EventBus, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Fold `secondary_id` into `primary_id`
    ///
    /// Rejects blank or equal ids (Validation) and unknown leads (NotFound)
    /// before anything is written.
    pub async fn merge(&self, primary_id: &LeadId, secondary_id: &LeadId) -> Result<MergeReport> {
        if primary_id.as_str().trim().is_empty() || secondary_id.as_str().trim().is_empty() {
            return Err(Error::Validation(
                "both primaryId and secondaryId are required".to_string(),
            ));
        }
        if primary_id == secondary_id {
            return Err(Error::Validation("cannot merge a lead into itself".to_string()));
        }

        let (report, events) = retry_on_lock("merge leads", self.max_lock_wait_ms, || {
            self.merge_once(primary_id, secondary_id)
        })
        .await?;

        for event in events {
            self.event_bus.emit_lossy(event);
        }

        tracing::info!(
            primary = %primary_id,
            secondary = %secondary_id,
            tasks_reparented = report.tasks_reparented,
            follow_ups_removed = report.follow_ups_removed,
            interactions_added = report.interactions_added,
            "Leads merged"
        );
        Ok(report)
    }

    async fn merge_once(
        &self,
        primary_id: &LeadId,
        secondary_id: &LeadId,
    ) -> Result<(MergeReport, Vec<ChangeEvent>)> {
        let now = time::now();
        let mut tx = self.db.begin().await?;

        let Some(primary) = leads::load_lead(&mut *tx, primary_id).await? else {
            return Err(Error::NotFound(format!("lead {}", primary_id)));
        };
        let Some(secondary) = leads::load_lead(&mut *tx, secondary_id).await? else {
            return Err(Error::NotFound(format!("lead {}", secondary_id)));
        };

        // The primary's cycle wins; the secondary's pending follow-ups would
        // leave two open follow-ups behind.
        let owned = tasks::tasks_for_lead(&mut *tx, secondary_id).await?;
        let mut changes = TaskChanges::default();
        for task in owned {
            if task.is_open() && task.kind.is_follow_up() {
                tasks::delete_task(&mut *tx, &task.id).await?;
                changes.deleted.push(task);
            } else {
                let mut moved = task.clone();
                moved.lead_id = primary.id.clone();
                moved.lead_name = primary.name.clone();
                changes.updated.push((task, moved));
            }
        }
        let reparented = tasks::reparent_tasks(&mut *tx, secondary_id, primary_id, &primary.name).await?;

        let mut after = primary.clone();
        let added = union_interactions(&mut after, &secondary);
        after
            .interactions
            .push(Interaction::new(
                InteractionKind::MergeNote {
                    merged_lead_id: secondary.id.clone(),
                },
                now,
            )
            .with_notes(merge_note(&secondary)));
        after.has_engaged |= secondary.has_engaged;

        leads::update_lead(&mut *tx, &after).await?;
        leads::delete_lead(&mut *tx, secondary_id).await?;
        tx.commit().await?;

        let report = MergeReport {
            primary: after.clone(),
            merged_lead_id: secondary.id.clone(),
            tasks_reparented: reparented as usize,
            follow_ups_removed: changes.deleted.len(),
            interactions_added: added,
        };

        let mut events = vec![
            ChangeEvent::lead_updated(primary, after),
            ChangeEvent::lead_deleted(secondary, Some(primary_id.clone())),
        ];
        events.extend(changes.into_events());
        Ok((report, events))
    }

    /// Delete each listed lead; unknown ids are reported, not errors
    ///
    /// Each lead is its own transaction, which also removes the lead's tasks.
    pub async fn bulk_delete(&self, ids: &[LeadId]) -> Result<BulkDeleteReport> {
        if ids.is_empty() {
            return Err(Error::Validation("ids must not be empty".to_string()));
        }

        let mut report = BulkDeleteReport::default();
        let mut seen = HashSet::new();

        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            let removed = retry_on_lock("delete lead", self.max_lock_wait_ms, || self.delete_once(id)).await?;
            match removed {
                Some((lead, owned)) => {
                    report.deleted += 1;
                    report.tasks_deleted += owned.len();
                    self.event_bus.emit_lossy(ChangeEvent::lead_deleted(lead, None));
                    let changes = TaskChanges {
                        deleted: owned,
                        ..Default::default()
                    };
                    for event in changes.into_events() {
                        self.event_bus.emit_lossy(event);
                    }
                }
                None => report.not_found.push(id.clone()),
            }
        }

        tracing::info!(
            requested = ids.len(),
            deleted = report.deleted,
            tasks_deleted = report.tasks_deleted,
            not_found = report.not_found.len(),
            "Bulk delete finished"
        );
        Ok(report)
    }

    async fn delete_once(&self, id: &LeadId) -> Result<Option<(Lead, Vec<Task>)>> {
        let mut tx = self.db.begin().await?;
        let Some(lead) = leads::load_lead(&mut *tx, id).await? else {
            return Ok(None);
        };
        let owned = tasks::tasks_for_lead(&mut *tx, id).await?;
        tasks::delete_tasks_for_lead(&mut *tx, id).await?;
        leads::delete_lead(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(Some((lead, owned)))
    }
}

/// Append the secondary's interactions the primary does not already hold
///
/// Returns how many were added. The log stays ordered by creation time.
fn union_interactions(primary: &mut Lead, secondary: &Lead) -> usize {
    let known: HashSet<_> = primary.interactions.iter().map(|i| i.id.clone()).collect();
    let fresh: Vec<Interaction> = secondary
        .interactions
        .iter()
        .filter(|i| !known.contains(&i.id))
        .cloned()
        .collect();
    let added = fresh.len();

    primary.interactions.extend(fresh);
    primary.interactions.sort_by_key(|i| i.created_at);
    added
}

/// Identity summary of the retired lead
fn merge_note(secondary: &Lead) -> String {
    let mut parts = vec![format!("name: {}", secondary.name)];
    if let Some(email) = &secondary.email {
        parts.push(format!("email: {}", email));
    }
    let phones: Vec<&str> = secondary.phone_numbers().collect();
    if !phones.is_empty() {
        parts.push(format!("phones: {}", phones.join(", ")));
    }
    format!("Merged lead {} ({}).", secondary.id, parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use afc_common::db::init_database;
    use afc_common::model::{Phone, PhoneType, QuickLogType, Task, TaskKind};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, MergeEngine, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("merge.db")).await.unwrap();
        let engine = MergeEngine::new(pool.clone(), EventBus::new(64), 1000);
        (temp_dir, engine, pool)
    }

    async fn insert(pool: &SqlitePool, lead: &Lead) {
        let mut conn = pool.acquire().await.unwrap();
        leads::insert_lead(&mut conn, lead).await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_reparents_and_unions() {
        let (_dir, engine, pool) = setup().await;
        let now = Utc::now();
        let shared = Interaction::quick_log(QuickLogType::Followup, now - Duration::days(2));

        let mut primary = Lead::new("Primary", now);
        primary.interactions.push(shared.clone());
        let mut secondary = Lead::new("Secondary", now);
        secondary.email = Some("s@x.com".to_string());
        secondary.phones.push(Phone {
            number: "971500000009".to_string(),
            phone_type: PhoneType::Chat,
        });
        secondary.interactions.push(shared);
        secondary
            .interactions
            .push(Interaction::feedback("called back", now - Duration::days(1)));
        insert(&pool, &primary).await;
        insert(&pool, &secondary).await;

        let mut conn = pool.acquire().await.unwrap();
        let chore = Task::new(secondary.id.clone(), "Secondary", TaskKind::InfoRequest, "Send fees", None, now);
        let follow_up = Task::new(
            secondary.id.clone(),
            "Secondary",
            TaskKind::FollowUp { step: 1 },
            "Day 1 Follow-up",
            Some(now),
            now,
        );
        tasks::insert_task(&mut conn, &chore).await.unwrap();
        tasks::insert_task(&mut conn, &follow_up).await.unwrap();

        let report = engine.merge(&primary.id, &secondary.id).await.unwrap();
        assert_eq!(report.tasks_reparented, 1);
        assert_eq!(report.follow_ups_removed, 1);
        assert_eq!(report.interactions_added, 1);

        let stored = leads::load_lead(&mut conn, &primary.id).await.unwrap().unwrap();
        // shared + feedback + merge note
        assert_eq!(stored.interactions.len(), 3);
        let note = stored.interactions.last().unwrap();
        assert!(matches!(note.kind, InteractionKind::MergeNote { .. }));
        assert!(note.notes_str().contains("s@x.com"));

        assert!(leads::load_lead(&mut conn, &secondary.id).await.unwrap().is_none());
        let moved = tasks::tasks_for_lead(&mut conn, &primary.id).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].lead_name, "Primary");
    }

    #[tokio::test]
    async fn test_merge_rejects_bad_ids() {
        let (_dir, engine, pool) = setup().await;
        let lead = Lead::new("Only", Utc::now());
        insert(&pool, &lead).await;

        assert!(matches!(
            engine.merge(&lead.id, &lead.id).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.merge(&lead.id, &LeadId::from("")).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.merge(&lead.id, &LeadId::from("ghost")).await,
            Err(Error::NotFound(_))
        ));

        let mut conn = pool.acquire().await.unwrap();
        let stored = leads::load_lead(&mut conn, &lead.id).await.unwrap().unwrap();
        assert!(stored.interactions.is_empty());
    }

    #[tokio::test]
    async fn test_merge_order_does_not_change_interaction_set() {
        let now = Utc::now();
        let logs: Vec<Interaction> = (0..3)
            .map(|i| Interaction::feedback(format!("note {}", i), now + Duration::minutes(i)))
            .collect();

        let mut a = Lead::new("A", now);
        a.interactions.push(logs[0].clone());
        let mut b = Lead::new("B", now);
        b.interactions.extend([logs[0].clone(), logs[1].clone()]);
        let mut c = Lead::new("C", now);
        c.interactions.extend([logs[1].clone(), logs[2].clone()]);

        let mut left = a.clone();
        union_interactions(&mut left, &b);
        union_interactions(&mut left, &c);

        let mut bc = b.clone();
        union_interactions(&mut bc, &c);
        let mut right = a.clone();
        union_interactions(&mut right, &bc);

        let ids = |lead: &Lead| lead.interactions.iter().map(|i| i.id.clone()).collect::<HashSet<_>>();
        assert_eq!(ids(&left), ids(&right));
        assert_eq!(left.interactions.len(), 3);
    }

    #[tokio::test]
    async fn test_bulk_delete_reports_missing() {
        let (_dir, engine, pool) = setup().await;
        let mut rx = engine.event_bus.subscribe();
        let lead = Lead::new("Gone", Utc::now());
        insert(&pool, &lead).await;

        let report = engine
            .bulk_delete(&[lead.id.clone(), LeadId::from("ghost"), lead.id.clone()])
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.not_found, vec![LeadId::from("ghost")]);

        match rx.try_recv().unwrap() {
            ChangeEvent::LeadChanged { after, merged_into, .. } => {
                assert!(after.is_none());
                assert!(merged_into.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bulk_delete_removes_tasks_without_the_hook() {
        let (_dir, engine, pool) = setup().await;
        let lead = Lead::new("Gone", Utc::now());
        insert(&pool, &lead).await;
        let mut conn = pool.acquire().await.unwrap();
        for description in ["Send fees", "Send brochure"] {
            let chore = Task::new(lead.id.clone(), "Gone", TaskKind::InfoRequest, description, None, Utc::now());
            tasks::insert_task(&mut conn, &chore).await.unwrap();
        }

        // No listener runs here, so the tasks must go with the lead
        let report = engine.bulk_delete(&[lead.id.clone()]).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.tasks_deleted, 2);
        assert!(tasks::tasks_for_lead(&mut conn, &lead.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_delete_requires_ids() {
        let (_dir, engine, _pool) = setup().await;
        assert!(matches!(engine.bulk_delete(&[]).await, Err(Error::Validation(_))));
    }
}
