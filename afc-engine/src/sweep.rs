//! Daily Sweep
//!
//! Closes the loop for leads that never answered: every open Interactive task
//! whose due date has passed is settled and turned into a synthetic
//! `Unresponsive` interaction for its lead. Two repair passes follow: leads
//! whose lifecycle never started are initialized, and any in-cycle lead that
//! lost its follow-up task gets a fresh Day 1 follow-up.
//!
//! Both passes are idempotent; a second run over the same state changes
//! nothing.

use afc_common::db::{leads, tasks};
use afc_common::events::{ChangeEvent, EventBus};
use afc_common::model::{Interaction, LeadStatus, QuickLogType, Task};
use afc_common::{time, LeadId, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dispatcher::{commit_decision, DispatchOutcome, InteractionDispatcher};
use crate::utils::retry_on_lock;

/// Step a lead returns to when its follow-up went missing
const REPAIR_STEP: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Overdue interactive tasks found
    pub overdue: usize,
    /// Tasks turned into an Unresponsive interaction
    pub processed: usize,
    /// Tasks settled elsewhere first, or whose lead is gone
    pub skipped: usize,
    /// Tasks that failed; each was logged
    pub errors: usize,
    /// Leads still without a status that were initialized
    pub initialized: usize,
    /// In-cycle leads given a fresh Day 1 follow-up
    pub repaired: usize,
}

#[derive(Clone)]
pub struct DailySweep {
    db: SqlitePool,
    event_bus: EventBus,
    dispatcher: InteractionDispatcher,
    max_lock_wait_ms: u64,
}

impl DailySweep {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        dispatcher: InteractionDispatcher,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            event_bus,
            dispatcher,
            max_lock_wait_ms,
        }
    }

    /// One sweep over everything overdue at `now`
    ///
    /// Only the initial task query can fail the run; per-task and per-lead
    /// failures are logged and counted.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let overdue = {
            let mut conn = self.db.acquire().await?;
            tasks::overdue_interactive_tasks(&mut conn, now).await?
        };

        let mut report = SweepReport {
            overdue: overdue.len(),
            ..Default::default()
        };
        tracing::info!(overdue = overdue.len(), "Daily sweep started");

        for task in &overdue {
            match self.settle_unresponsive(task, now).await {
                Ok(DispatchOutcome::Applied(_)) => report.processed += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        task_id = %task.id,
                        lead_id = %task.lead_id,
                        error = %e,
                        "Sweep failed to process overdue task"
                    );
                }
            }
        }

        report.initialized = self.initialize_unstarted(now).await;
        report.repaired = self.repair_missing_follow_ups(now).await;

        tracing::info!(
            overdue = report.overdue,
            processed = report.processed,
            skipped = report.skipped,
            errors = report.errors,
            initialized = report.initialized,
            repaired = report.repaired,
            "Daily sweep finished"
        );
        Ok(report)
    }

    async fn settle_unresponsive(&self, task: &Task, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let interaction = Interaction::quick_log(QuickLogType::Unresponsive, now).with_notes(format!(
            "System generated: No response to overdue task '{}'.",
            task.description
        ));
        self.dispatcher
            .dispatch(&task.lead_id, interaction, Some(&task.id))
            .await
    }

    /// Start the lifecycle of leads that were stored without a status
    ///
    /// Creation normally initializes a lead in its own transaction; this
    /// catches leads written by any other path.
    async fn initialize_unstarted(&self, now: DateTime<Utc>) -> usize {
        let candidates = match self.db.acquire().await {
            Ok(mut conn) => leads::leads_without_status(&mut conn).await,
            Err(e) => Err(e.into()),
        };
        let candidates = match candidates {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Sweep could not list unstarted leads");
                return 0;
            }
        };

        let mut initialized = 0;
        for lead in candidates {
            let result = retry_on_lock("initialize lead", self.max_lock_wait_ms, || {
                self.initialize_once(&lead.id, now)
            })
            .await;
            match result {
                Ok(Some(events)) => {
                    initialized += 1;
                    tracing::warn!(lead_id = %lead.id, "Lead had no status, lifecycle started by sweep");
                    for event in events {
                        self.event_bus.emit_lossy(event);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(lead_id = %lead.id, error = %e, "Sweep initialization failed"),
            }
        }
        initialized
    }

    async fn initialize_once(&self, lead_id: &LeadId, now: DateTime<Utc>) -> Result<Option<Vec<ChangeEvent>>> {
        let mut tx = self.db.begin().await?;
        let Some(before) = leads::load_lead(&mut *tx, lead_id).await? else {
            return Ok(None);
        };
        let Some(decision) = self.dispatcher.policy().initiate(&before, now) else {
            return Ok(None);
        };

        let mut after = before.clone();
        let changes = commit_decision(&mut *tx, &mut after, &decision, now).await?;
        tx.commit().await?;

        let mut events = vec![ChangeEvent::lead_updated(before, after)];
        events.extend(changes.into_events());
        Ok(Some(events))
    }

    /// Reset in-cycle leads without an open follow-up back to step 1
    async fn repair_missing_follow_ups(&self, now: DateTime<Utc>) -> usize {
        let candidates = match self.db.acquire().await {
            Ok(mut conn) => leads::leads_in_cycle(&mut conn).await,
            Err(e) => Err(e.into()),
        };
        let candidates = match candidates {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Sweep repair pass could not list leads");
                return 0;
            }
        };

        let mut repaired = 0;
        for lead in candidates {
            let result = retry_on_lock("repair follow-up", self.max_lock_wait_ms, || {
                self.repair_once(&lead.id, now)
            })
            .await;
            match result {
                Ok(Some(events)) => {
                    repaired += 1;
                    tracing::warn!(lead_id = %lead.id, "Lead in cycle had no follow-up, reset to step 1");
                    for event in events {
                        self.event_bus.emit_lossy(event);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(lead_id = %lead.id, error = %e, "Sweep repair failed"),
            }
        }
        repaired
    }

    async fn repair_once(&self, lead_id: &LeadId, now: DateTime<Utc>) -> Result<Option<Vec<ChangeEvent>>> {
        let mut tx = self.db.begin().await?;
        let Some(before) = leads::load_lead(&mut *tx, lead_id).await? else {
            return Ok(None);
        };
        if before.afc_step == 0 || before.status != Some(LeadStatus::Active) {
            return Ok(None);
        }
        let open = tasks::open_tasks_for_lead(&mut *tx, lead_id).await?;
        if open.iter().any(|t| t.kind.is_cycle_follow_up()) {
            return Ok(None);
        }

        let decision = self.dispatcher.policy().seed(&before, REPAIR_STEP, now)?;
        let mut after = before.clone();
        let changes = commit_decision(&mut *tx, &mut after, &decision, now).await?;
        tx.commit().await?;

        let mut events = vec![ChangeEvent::lead_updated(before, after)];
        events.extend(changes.into_events());
        Ok(Some(events))
    }
}

/// Fires the sweep at fixed local wall-clock times
pub struct SweepScheduler {
    sweep: DailySweep,
    times: Vec<NaiveTime>,
    offset: FixedOffset,
    last_error: Arc<RwLock<Option<String>>>,
}

impl SweepScheduler {
    pub fn new(
        sweep: DailySweep,
        times: Vec<NaiveTime>,
        offset: FixedOffset,
        last_error: Arc<RwLock<Option<String>>>,
    ) -> Self {
        let mut times = times;
        times.sort();
        times.dedup();
        Self {
            sweep,
            times,
            offset,
            last_error,
        }
    }

    /// First configured time strictly after `now`
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.offset).date_naive();
        (0..=1)
            .filter_map(|days| today.checked_add_signed(Duration::days(days)))
            .flat_map(|date| self.times.iter().map(move |t| date.and_time(*t)))
            .filter_map(|local| self.offset.from_local_datetime(&local).single())
            .map(|fire| fire.with_timezone(&Utc))
            .find(|fire| *fire > now)
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        loop {
            let now = time::now();
            let Some(next) = self.next_fire(now) else {
                tracing::warn!("No sweep times configured, scheduler stopping");
                return;
            };
            tracing::debug!(next = %next, "Next daily sweep scheduled");

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = self.sweep.run(time::now()).await {
                tracing::error!(error = %e, "Scheduled sweep failed");
                *self.last_error.write().await = Some(format!("sweep failed: {}", e));
            }
        }
    }
}
