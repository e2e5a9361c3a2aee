//! Task document operations

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::ids::{LeadId, TaskId};
use crate::model::{Task, TaskKind, TaskNature};
use crate::time::{from_millis, to_millis};
use crate::Result;

const TASK_COLUMNS: &str =
    "id, lead_id, lead_name, description, nature, kind, completed, due_date_ms, created_at_ms";

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let nature: String = row.try_get("nature")?;
    let kind: String = row.try_get("kind")?;
    let due_date_ms: Option<i64> = row.try_get("due_date_ms")?;
    let created_at_ms: i64 = row.try_get("created_at_ms")?;

    Ok(Task {
        id: TaskId::from(row.try_get::<String, _>("id")?),
        lead_id: LeadId::from(row.try_get::<String, _>("lead_id")?),
        lead_name: row.try_get("lead_name")?,
        description: row.try_get("description")?,
        nature: nature.parse::<TaskNature>()?,
        kind: serde_json::from_str::<TaskKind>(&kind)?,
        completed: row.try_get("completed")?,
        due_date: due_date_ms.map(from_millis),
        created_at: from_millis(created_at_ms),
    })
}

pub async fn insert_task(conn: &mut SqliteConnection, task: &Task) -> Result<()> {
    let kind = serde_json::to_string(&task.kind)?;

    sqlx::query(
        r#"
        INSERT INTO tasks (
            id, lead_id, lead_name, description, nature, kind, completed, due_date_ms, created_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.id.as_str())
    .bind(task.lead_id.as_str())
    .bind(&task.lead_name)
    .bind(&task.description)
    .bind(task.nature.as_str())
    .bind(kind)
    .bind(task.completed)
    .bind(task.due_date.map(to_millis))
    .bind(to_millis(task.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_task(conn: &mut SqliteConnection, id: &TaskId) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(task_from_row).transpose()
}

/// All tasks of a lead, oldest first
pub async fn tasks_for_lead(conn: &mut SqliteConnection, lead_id: &LeadId) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE lead_id = ? ORDER BY created_at_ms, id",
        TASK_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(lead_id.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(task_from_row).collect()
}

/// Open (not completed) tasks of a lead, oldest first
pub async fn open_tasks_for_lead(conn: &mut SqliteConnection, lead_id: &LeadId) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE lead_id = ? AND completed = 0 ORDER BY created_at_ms, id",
        TASK_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(lead_id.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(task_from_row).collect()
}

/// Open tasks across all leads
pub async fn count_open_tasks(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE completed = 0")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Mark a task completed only if it is still open
///
/// Returns true when this call performed the transition. A second caller
/// racing on the same task gets false, which makes completion idempotent.
pub async fn complete_task_if_open(conn: &mut SqliteConnection, id: &TaskId) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET completed = 1 WHERE id = ? AND completed = 0")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Change the due date and description of a task
pub async fn reschedule_task(
    conn: &mut SqliteConnection,
    id: &TaskId,
    due_date: Option<DateTime<Utc>>,
    description: &str,
) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET due_date_ms = ?, description = ? WHERE id = ?")
        .bind(due_date.map(to_millis))
        .bind(description)
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_task(conn: &mut SqliteConnection, id: &TaskId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete every task of a lead; returns the number removed
pub async fn delete_tasks_for_lead(conn: &mut SqliteConnection, lead_id: &LeadId) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tasks WHERE lead_id = ?")
        .bind(lead_id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Move every task of `from` to `to`, refreshing the denormalized lead name
pub async fn reparent_tasks(
    conn: &mut SqliteConnection,
    from: &LeadId,
    to: &LeadId,
    to_name: &str,
) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET lead_id = ?, lead_name = ? WHERE lead_id = ?")
        .bind(to.as_str())
        .bind(to_name)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Open Interactive tasks whose due date is strictly before `now`
pub async fn overdue_interactive_tasks(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<Task>> {
    let sql = format!(
        r#"
        SELECT {} FROM tasks
        WHERE completed = 0 AND nature = 'Interactive'
          AND due_date_ms IS NOT NULL AND due_date_ms < ?
        ORDER BY due_date_ms, id
        "#,
        TASK_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(to_millis(now))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(task_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::ids::InstallmentId;
    use chrono::Duration;
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    async fn test_pool() -> (TempDir, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("tasks.db")).await.unwrap();
        (temp_dir, pool)
    }

    fn task(lead: &LeadId, kind: TaskKind, due: Option<DateTime<Utc>>) -> Task {
        Task::new(lead.clone(), "Nour", kind, "desc", due, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_load_preserves_kind() {
        let (_dir, pool) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let lead = LeadId::generate();

        let t = task(
            &lead,
            TaskKind::PaymentReminder {
                installment_id: InstallmentId::from("inst-1"),
            },
            Some(Utc::now()),
        );
        insert_task(&mut conn, &t).await.unwrap();

        let loaded = load_task(&mut conn, &t.id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, t.kind);
        assert_eq!(loaded.nature, TaskNature::Procedural);
        assert!(!loaded.completed);
    }

    #[tokio::test]
    async fn test_complete_if_open_is_idempotent() {
        let (_dir, pool) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let lead = LeadId::generate();
        let t = task(&lead, TaskKind::FollowUp { step: 1 }, None);
        insert_task(&mut conn, &t).await.unwrap();
        assert_eq!(count_open_tasks(&mut conn).await.unwrap(), 1);

        assert!(complete_task_if_open(&mut conn, &t.id).await.unwrap());
        assert!(!complete_task_if_open(&mut conn, &t.id).await.unwrap());
        assert!(open_tasks_for_lead(&mut conn, &lead).await.unwrap().is_empty());
        assert_eq!(count_open_tasks(&mut conn).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overdue_query_only_returns_open_interactive_past_due() {
        let (_dir, pool) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let lead = LeadId::generate();
        let now = Utc::now();

        let overdue = task(&lead, TaskKind::FollowUp { step: 1 }, Some(now - Duration::hours(1)));
        let future = task(&lead, TaskKind::FollowUp { step: 2 }, Some(now + Duration::hours(1)));
        let procedural = task(&lead, TaskKind::InfoRequest, Some(now - Duration::hours(1)));
        let mut done = task(&lead, TaskKind::ScheduledFollowUp, Some(now - Duration::hours(2)));
        done.completed = true;
        for t in [&overdue, &future, &procedural, &done] {
            insert_task(&mut conn, t).await.unwrap();
        }

        let found = overdue_interactive_tasks(&mut conn, now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, overdue.id);
    }

    #[tokio::test]
    async fn test_reparent_moves_all_tasks() {
        let (_dir, pool) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let from = LeadId::generate();
        let to = LeadId::generate();
        insert_task(&mut conn, &task(&from, TaskKind::LearnerSetup, None)).await.unwrap();
        insert_task(&mut conn, &task(&from, TaskKind::InfoRequest, None)).await.unwrap();

        assert_eq!(reparent_tasks(&mut conn, &from, &to, "Primary").await.unwrap(), 2);
        let moved = tasks_for_lead(&mut conn, &to).await.unwrap();
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|t| t.lead_name == "Primary"));
        assert_eq!(delete_tasks_for_lead(&mut conn, &to).await.unwrap(), 2);
    }
}
