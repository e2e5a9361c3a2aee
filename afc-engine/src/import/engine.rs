//! Import orchestration

use afc_common::events::EventBus;
use afc_common::model::{Interaction, InteractionKind, Lead, LeadStatus, Relationship, Task, TaskKind};
use afc_common::time::{self, add_days};
use afc_common::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use super::batch::{BatchOp, LeadUpdate, WriteBatch};
use super::matcher::{self, Match, PendingIndex};
use super::row::{parse_row, ParsedRow};
use super::{ImportMode, ImportReport, ImportRequest};
use crate::policy::{AfcPolicy, LEARNER_SETUP_DESCRIPTION};
use crate::reconciler::task_from_intent;

/// Provenance recorded on leads created by an import
pub const IMPORT_SOURCE: &str = "import";

#[derive(Clone)]
pub struct ImportEngine {
    db: SqlitePool,
    event_bus: EventBus,
    policy: Arc<AfcPolicy>,
    batch_limit: usize,
    preview_size: usize,
    max_lock_wait_ms: u64,
}

impl ImportEngine {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        policy: Arc<AfcPolicy>,
        batch_limit: usize,
        preview_size: usize,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            event_bus,
            policy,
            batch_limit,
            preview_size,
            max_lock_wait_ms,
        }
    }

    /// Import `request.rows`
    ///
    /// **Per row:**
    /// 1. Parse and normalize; a row without a name is skipped with a reason
    /// 2. Match by email against earlier rows of this import and the store,
    ///    then by phone the same way; a match on an earlier row is skipped
    /// 3. Match + insertOnly: skip. Match + upsert: update in place.
    ///    No match: create with initial lifecycle state
    ///
    /// Writes go out in batches of at most `batch_limit` document writes.
    /// A failed batch stops the import; the report then counts only what
    /// was committed and carries the error. Dry runs write nothing.
    pub async fn import(&self, request: ImportRequest) -> Result<ImportReport> {
        let now = time::now();
        let mut report = ImportReport::default();
        let mut pending = PendingIndex::default();
        let mut batch = WriteBatch::new(self.batch_limit);
        let mut preview = Vec::new();
        let mut conn = self.db.acquire().await?;

        tracing::info!(
            rows = request.rows.len(),
            mode = ?request.mode,
            dry_run = request.dry_run,
            "Import started"
        );

        for (index, raw) in request.rows.iter().enumerate() {
            let row_no = index + 1;

            let parsed = match parse_row(raw) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    tracing::debug!(row = row_no, reason = %reason, "Skipping import row");
                    report.skip(row_no, reason);
                    continue;
                }
            };

            let phones: Vec<&str> = parsed.phone_numbers().collect();
            let found = match matcher::resolve(&mut conn, &pending, parsed.email.as_deref(), &phones).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::error!(row = row_no, error = %e, "Import lookup failed, stopping");
                    report.error = Some(format!("lookup failed at row {}", row_no));
                    break;
                }
            };

            let (op, preview_lead) = match (found, request.mode) {
                (Match::Pending(first), _) => {
                    report.skip(row_no, format!("duplicate of row {} in this import", first));
                    continue;
                }
                (Match::Stored(lead), ImportMode::InsertOnly) => {
                    pending.claim(row_no, parsed.email.as_deref(), phones.iter().copied());
                    report.skip(row_no, format!("matches existing lead {}", lead.id));
                    continue;
                }
                (Match::Stored(lead), ImportMode::Upsert) => plan_update(lead, &parsed),
                (Match::None, _) => match self.plan_create(&parsed, now) {
                    Ok(op) => (op, None),
                    Err(reason) => {
                        report.skip(row_no, reason);
                        continue;
                    }
                },
            };
            pending.claim(row_no, parsed.email.as_deref(), phones.iter().copied());

            if request.dry_run {
                if op.is_create() {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
                if preview.len() < self.preview_size {
                    preview.extend(preview_lead.or_else(|| op.created_lead().cloned()));
                }
                continue;
            }

            if batch.would_overflow(&op) && !self.flush(&mut batch, &mut report, now).await {
                return Ok(report);
            }
            batch.push(op);
        }
        drop(conn);

        if request.dry_run {
            report.preview = Some(preview);
        } else if !batch.is_empty() && report.error.is_none() {
            self.flush(&mut batch, &mut report, now).await;
        }

        tracing::info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            dry_run = request.dry_run,
            failed = report.error.is_some(),
            "Import finished"
        );
        Ok(report)
    }

    /// Commit the batch; false when it failed and the import must stop
    async fn flush(&self, batch: &mut WriteBatch, report: &mut ImportReport, now: DateTime<Utc>) -> bool {
        let created = batch.created_count();
        let updated = batch.updated_count();

        match batch.commit(&self.db, self.max_lock_wait_ms, now).await {
            Ok(events) => {
                report.created += created;
                report.updated += updated;
                for event in events {
                    self.event_bus.emit_lossy(event);
                }
                true
            }
            Err(e) => {
                tracing::error!(error = %e, created, updated, "Import batch failed to commit");
                report.error = Some(format!(
                    "batch of {} rows failed to commit; earlier batches were kept",
                    created + updated
                ));
                false
            }
        }
    }

    /// New lead for a row with no match
    ///
    /// Learners get their setup chore; leads with a stage hint start the
    /// cycle at that step; everyone else gets an import provenance entry
    /// that does not touch the cycle.
    fn plan_create(&self, row: &ParsedRow, now: DateTime<Utc>) -> std::result::Result<BatchOp, String> {
        let mut lead = Lead::new(row.name.clone(), now);
        lead.email = row.email.clone();
        lead.phones = row.phones.clone();
        lead.relationship = row.relationship_or_default();
        lead.status = Some(row.derived_status());
        lead.commitment_snapshot.quote_lines = row.quote_lines.clone();

        let stage = row.afc_stage.filter(|s| *s > 0);
        let mut tasks = Vec::new();

        match (lead.relationship, stage) {
            (Relationship::Learner, _) => {
                tasks.push(Task::new(
                    lead.id.clone(),
                    lead.name.clone(),
                    TaskKind::LearnerSetup,
                    LEARNER_SETUP_DESCRIPTION,
                    Some(add_days(now, 1)),
                    now,
                ));
            }
            (Relationship::Lead, Some(stage)) if lead.status == Some(LeadStatus::Active) => {
                let decision = self.policy.seed(&lead, stage, now).map_err(|e| e.to_string())?;
                decision.apply_to(&mut lead);
                tasks.extend(
                    decision
                        .intents
                        .iter()
                        .filter_map(|intent| task_from_intent(&lead, intent, now)),
                );
            }
            _ => {
                lead.interactions.push(Interaction::new(
                    InteractionKind::Initiated {
                        source: IMPORT_SOURCE.to_string(),
                    },
                    now,
                ));
            }
        }

        Ok(BatchOp::Create { lead, tasks })
    }
}

/// Upsert of a matched lead
///
/// The write carries only what the row derives; the lead is re-read and
/// patched inside the batch transaction. The returned lead shows the result
/// against the current snapshot, for dry-run previews.
fn plan_update(current: Lead, row: &ParsedRow) -> (BatchOp, Option<Lead>) {
    let update = LeadUpdate {
        name: row.name.clone(),
        email: row.email.clone(),
        phones: row.phones.clone(),
        relationship: row.relationship_or_default(),
        status: row.derived_status(),
        quote_lines: row.quote_lines.clone(),
    };

    let lead_id = current.id.clone();
    let mut preview = current;
    update.apply_to(&mut preview);

    (BatchOp::Update { lead_id, update }, Some(preview))
}
