//! Lead document operations

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::ids::LeadId;
use crate::model::{Lead, LeadStatus};
use crate::time::{from_millis, now, to_millis};
use crate::Result;

const LEAD_COLUMNS: &str = "id, name, email, phones, relationship, status, afc_step, has_engaged, \
     on_follow_list, interactions, commitment_snapshot, payment_plan, last_interaction_ms, created_at_ms";

fn lead_from_row(row: &SqliteRow) -> Result<Lead> {
    let phones: String = row.try_get("phones")?;
    let interactions: String = row.try_get("interactions")?;
    let snapshot: String = row.try_get("commitment_snapshot")?;
    let payment_plan: Option<String> = row.try_get("payment_plan")?;
    let relationship: String = row.try_get("relationship")?;
    let status: Option<String> = row.try_get("status")?;
    let afc_step: i64 = row.try_get("afc_step")?;
    let last_interaction_ms: Option<i64> = row.try_get("last_interaction_ms")?;
    let created_at_ms: i64 = row.try_get("created_at_ms")?;

    Ok(Lead {
        id: LeadId::from(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phones: serde_json::from_str(&phones)?,
        relationship: relationship.parse()?,
        status: status.map(|s| s.parse::<LeadStatus>()).transpose()?,
        afc_step: u8::try_from(afc_step).unwrap_or(0),
        has_engaged: row.try_get("has_engaged")?,
        on_follow_list: row.try_get("on_follow_list")?,
        interactions: serde_json::from_str(&interactions)?,
        commitment_snapshot: serde_json::from_str(&snapshot)?,
        payment_plan: payment_plan.map(|p| serde_json::from_str(&p)).transpose()?,
        last_interaction_date: last_interaction_ms.map(from_millis),
        created_at: from_millis(created_at_ms),
    })
}

/// Insert a new lead document
pub async fn insert_lead(conn: &mut SqliteConnection, lead: &Lead) -> Result<()> {
    let phones = serde_json::to_string(&lead.phones)?;
    let interactions = serde_json::to_string(&lead.interactions)?;
    let snapshot = serde_json::to_string(&lead.commitment_snapshot)?;
    let payment_plan = lead.payment_plan.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO leads (
            id, name, email, phones, relationship, status, afc_step, has_engaged,
            on_follow_list, interactions, commitment_snapshot, payment_plan,
            last_interaction_ms, created_at_ms, updated_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lead.id.as_str())
    .bind(&lead.name)
    .bind(&lead.email)
    .bind(phones)
    .bind(lead.relationship.as_str())
    .bind(lead.status.map(|s| s.as_str()))
    .bind(i64::from(lead.afc_step))
    .bind(lead.has_engaged)
    .bind(lead.on_follow_list)
    .bind(interactions)
    .bind(snapshot)
    .bind(payment_plan)
    .bind(lead.last_interaction_date.map(to_millis))
    .bind(to_millis(lead.created_at))
    .bind(to_millis(now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Overwrite every field of an existing lead; returns false if it no longer exists
pub async fn update_lead(conn: &mut SqliteConnection, lead: &Lead) -> Result<bool> {
    let phones = serde_json::to_string(&lead.phones)?;
    let interactions = serde_json::to_string(&lead.interactions)?;
    let snapshot = serde_json::to_string(&lead.commitment_snapshot)?;
    let payment_plan = lead.payment_plan.as_ref().map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE leads SET
            name = ?, email = ?, phones = ?, relationship = ?, status = ?,
            afc_step = ?, has_engaged = ?, on_follow_list = ?, interactions = ?,
            commitment_snapshot = ?, payment_plan = ?, last_interaction_ms = ?,
            updated_at_ms = ?
        WHERE id = ?
        "#,
    )
    .bind(&lead.name)
    .bind(&lead.email)
    .bind(phones)
    .bind(lead.relationship.as_str())
    .bind(lead.status.map(|s| s.as_str()))
    .bind(i64::from(lead.afc_step))
    .bind(lead.has_engaged)
    .bind(lead.on_follow_list)
    .bind(interactions)
    .bind(snapshot)
    .bind(payment_plan)
    .bind(lead.last_interaction_date.map(to_millis))
    .bind(to_millis(now()))
    .bind(lead.id.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load a lead by id
pub async fn load_lead(conn: &mut SqliteConnection, id: &LeadId) -> Result<Option<Lead>> {
    let sql = format!("SELECT {} FROM leads WHERE id = ?", LEAD_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(lead_from_row).transpose()
}

/// Delete a lead; returns false if it did not exist
pub async fn delete_lead(conn: &mut SqliteConnection, id: &LeadId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM leads WHERE id = ?")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Oldest lead whose normalized email equals `email`
pub async fn find_lead_by_email(conn: &mut SqliteConnection, email: &str) -> Result<Option<Lead>> {
    let sql = format!(
        "SELECT {} FROM leads WHERE email = ? ORDER BY created_at_ms, id LIMIT 1",
        LEAD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(lead_from_row).transpose()
}

/// Oldest lead with `number` among its phones (any phone type)
pub async fn find_lead_by_phone(conn: &mut SqliteConnection, number: &str) -> Result<Option<Lead>> {
    let sql = format!(
        r#"
        SELECT {} FROM leads
        WHERE EXISTS (
            SELECT 1 FROM json_each(leads.phones) p
            WHERE json_extract(p.value, '$.number') = ?
        )
        ORDER BY created_at_ms, id
        LIMIT 1
        "#,
        LEAD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(lead_from_row).transpose()
}

/// Active leads with the follow-up cycle running (afc_step > 0)
pub async fn leads_in_cycle(conn: &mut SqliteConnection) -> Result<Vec<Lead>> {
    let sql = format!(
        "SELECT {} FROM leads WHERE status = 'Active' AND afc_step > 0 ORDER BY created_at_ms",
        LEAD_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(lead_from_row).collect()
}

/// Leads whose lifecycle never started (no status assigned yet)
pub async fn leads_without_status(conn: &mut SqliteConnection) -> Result<Vec<Lead>> {
    let sql = format!(
        "SELECT {} FROM leads WHERE status IS NULL ORDER BY created_at_ms",
        LEAD_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(lead_from_row).collect()
}

pub async fn count_leads(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Leads whose AFC was never initialized
pub async fn count_leads_without_status(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE status IS NULL")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
