//! Payment-Plan Sync
//!
//! Keeps one reminder task per unpaid, dated installment. Reminders are keyed
//! by installment id (the task kind), so two installments of equal amount
//! never share a reminder. The reminder is due one day before the installment.

use afc_common::db::tasks;
use afc_common::model::{Installment, InstallmentStatus, Lead, Task, TaskKind};
use afc_common::time::{add_days, from_millis, to_millis};
use afc_common::{InstallmentId, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::HashMap;

use crate::reconciler::TaskChanges;

/// Human-readable reminder text
pub fn reminder_description(installment: &Installment, currency: Option<&str>) -> String {
    let amount = match currency.map(str::trim).filter(|c| !c.is_empty()) {
        Some(currency) => format!("{:.2} {}", installment.amount, currency),
        None => format!("{:.2}", installment.amount),
    };
    match installment.due_date {
        Some(due) => format!("Payment reminder: {} due {}", amount, due.format("%Y-%m-%d")),
        None => format!("Payment reminder: {}", amount),
    }
}

/// Bring reminder tasks in line with the lead's current payment plan
///
/// **Algorithm:**
/// 1. Desired set: every Unpaid installment that has a due date
/// 2. For each desired installment: create its reminder if none exists, or
///    move the open reminder's due date and text when the installment changed
/// 3. Open reminders for installments that were paid or removed are deleted
///
/// Completed reminders are history and are never touched or recreated.
pub async fn sync_payment_plan(
    conn: &mut SqliteConnection,
    lead: &Lead,
    now: DateTime<Utc>,
) -> Result<TaskChanges> {
    let mut changes = TaskChanges::default();
    let currency = lead.commitment_snapshot.currency.as_deref();

    let desired: HashMap<&InstallmentId, &Installment> = lead
        .payment_plan
        .iter()
        .flat_map(|plan| plan.installments.iter())
        .filter(|i| i.status == InstallmentStatus::Unpaid && i.due_date.is_some())
        .map(|i| (&i.id, i))
        .collect();

    let mut existing: HashMap<InstallmentId, Vec<Task>> = HashMap::new();
    for task in tasks::tasks_for_lead(conn, &lead.id).await? {
        if let TaskKind::PaymentReminder { installment_id } = &task.kind {
            existing.entry(installment_id.clone()).or_default().push(task);
        }
    }

    for (installment_id, installment) in &desired {
        // Task due dates are stored at millisecond precision
        let due = installment.due_date.map(|d| from_millis(to_millis(add_days(d, -1))));
        let description = reminder_description(installment, currency);

        match existing.remove(*installment_id) {
            None => {
                let task = Task::new(
                    lead.id.clone(),
                    lead.name.clone(),
                    TaskKind::PaymentReminder {
                        installment_id: (*installment_id).clone(),
                    },
                    description,
                    due,
                    now,
                );
                tasks::insert_task(conn, &task).await?;
                tracing::debug!(lead_id = %lead.id, installment_id = %installment_id, "Created payment reminder");
                changes.created.push(task);
            }
            Some(reminders) => {
                let mut open = reminders.into_iter().filter(Task::is_open);
                if let Some(current) = open.next() {
                    if current.due_date != due || current.description != description {
                        tasks::reschedule_task(conn, &current.id, due, &description).await?;
                        let mut after = current.clone();
                        after.due_date = due;
                        after.description = description;
                        changes.updated.push((current, after));
                    }
                }
                // Duplicates from an earlier crash are collapsed to one
                for extra in open {
                    if tasks::delete_task(conn, &extra.id).await? {
                        changes.deleted.push(extra);
                    }
                }
            }
        }
    }

    // Whatever is left belongs to paid or removed installments
    for (installment_id, reminders) in existing {
        for task in reminders.into_iter().filter(Task::is_open) {
            if tasks::delete_task(conn, &task.id).await? {
                tracing::debug!(lead_id = %lead.id, installment_id = %installment_id, "Deleted payment reminder");
                changes.deleted.push(task);
            }
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use afc_common::db::{init_database, leads};
    use afc_common::model::PaymentPlan;
    use chrono::{Duration, TimeZone};
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    fn installment(id: &str, amount: f64, due: DateTime<Utc>) -> Installment {
        Installment {
            id: InstallmentId::from(id),
            amount,
            due_date: Some(due),
            status: InstallmentStatus::Unpaid,
        }
    }

    async fn setup(plan: PaymentPlan) -> (TempDir, SqlitePool, Lead) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("payments.db")).await.unwrap();
        let mut lead = Lead::new("Yousef", Utc::now());
        lead.payment_plan = Some(plan);
        lead.commitment_snapshot.currency = Some("AED".to_string());
        let mut conn = pool.acquire().await.unwrap();
        leads::insert_lead(&mut conn, &lead).await.unwrap();
        drop(conn);
        (temp_dir, pool, lead)
    }

    fn due(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_description_includes_amount_and_date() {
        let text = reminder_description(&installment("a", 1500.0, due(10)), Some("AED"));
        assert_eq!(text, "Payment reminder: 1500.00 AED due 2026-05-10");
    }

    #[tokio::test]
    async fn test_equal_amounts_get_separate_reminders() {
        let plan = PaymentPlan {
            installments: vec![installment("a", 500.0, due(1)), installment("b", 500.0, due(1))],
        };
        let (_dir, pool, lead) = setup(plan).await;
        let mut conn = pool.acquire().await.unwrap();

        let changes = sync_payment_plan(&mut conn, &lead, Utc::now()).await.unwrap();
        assert_eq!(changes.created.len(), 2);
        assert!(changes
            .created
            .iter()
            .all(|t| t.due_date == Some(due(1) - Duration::days(1))));

        // Second pass is a no-op
        let again = sync_payment_plan(&mut conn, &lead, Utc::now()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_paid_or_removed_installments_lose_their_reminders() {
        let plan = PaymentPlan {
            installments: vec![installment("a", 100.0, due(3)), installment("b", 200.0, due(4))],
        };
        let (_dir, pool, mut lead) = setup(plan).await;
        let mut conn = pool.acquire().await.unwrap();
        sync_payment_plan(&mut conn, &lead, Utc::now()).await.unwrap();

        let plan = lead.payment_plan.as_mut().unwrap();
        plan.installments[0].status = InstallmentStatus::Paid;
        plan.installments.remove(1);
        let changes = sync_payment_plan(&mut conn, &lead, Utc::now()).await.unwrap();
        assert_eq!(changes.deleted.len(), 2);
        assert!(tasks::open_tasks_for_lead(&mut conn, &lead.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_date_change_moves_existing_reminder() {
        let plan = PaymentPlan {
            installments: vec![installment("a", 100.0, due(3))],
        };
        let (_dir, pool, mut lead) = setup(plan).await;
        let mut conn = pool.acquire().await.unwrap();
        let created = sync_payment_plan(&mut conn, &lead, Utc::now()).await.unwrap();
        let task_id = created.created[0].id.clone();

        lead.payment_plan.as_mut().unwrap().installments[0].due_date = Some(due(20));
        let changes = sync_payment_plan(&mut conn, &lead, Utc::now()).await.unwrap();
        assert_eq!(changes.updated.len(), 1);
        assert!(changes.created.is_empty());

        let task = tasks::load_task(&mut conn, &task_id).await.unwrap().unwrap();
        assert_eq!(task.due_date, Some(due(19)));
        assert!(task.description.ends_with("due 2026-05-20"));
    }
}
