//! Integration tests for the callable HTTP surface
//!
//! Requests go through the full router with the change listener running.
//! Writes finish their lifecycle work before responding, so the tests assert
//! on stored state right after each request.

mod helpers;

use afc_common::db::{leads, tasks};
use afc_common::events::EventBus;
use afc_common::model::{Lead, LeadStatus, Task, TaskKind};
use afc_engine::listener::spawn_listener;
use afc_engine::{build_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use helpers::{create_test_db, create_test_state_with_bus, insert_lead, insert_task};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    _dir: TempDir,
    pool: SqlitePool,
    router: Router,
    _listener: tokio::task::JoinHandle<()>,
}

async fn create_test_app() -> TestApp {
    create_test_app_with_bus(EventBus::new(1000)).await
}

async fn create_test_app_with_bus(event_bus: EventBus) -> TestApp {
    let (dir, pool) = create_test_db().await.unwrap();
    let state: AppState = create_test_state_with_bus(pool.clone(), event_bus);
    let listener = spawn_listener(&state.event_bus, state.lifecycle.clone());
    TestApp {
        _dir: dir,
        pool,
        router: build_router(state),
        _listener: listener,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn open_tasks(pool: &SqlitePool, lead_id: &str) -> Vec<Task> {
    let mut conn = pool.acquire().await.unwrap();
    tasks::open_tasks_for_lead(&mut conn, &lead_id.into()).await.unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "afc-engine");
    assert_eq!(body["store"]["leads"], 0);
    assert_eq!(body["event_subscribers"], 1);
    assert_eq!(body["sweep"]["enabled"], true);
    assert!(body.get("last_error").is_none());

    let mut unstarted = Lead::new("Waiting", Utc::now());
    unstarted.status = None;
    insert_lead(&app.pool, &unstarted).await;
    send(&app, "POST", "/api/leads", Some(json!({ "name": "Started" }))).await;

    let (_, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(body["store"]["leads"], 2);
    assert_eq!(body["store"]["unstarted_leads"], 1);
    assert_eq!(body["store"]["open_tasks"], 1);
}

#[tokio::test]
async fn test_created_lead_is_initialized_before_response() {
    let app = create_test_app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/leads",
        Some(json!({ "name": "  Reem   Haddad ", "email": "Reem@Example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Reem Haddad");
    assert_eq!(body["email"], "reem@example.com");
    assert_eq!(body["status"], "Active");
    assert_eq!(body["afc_step"], 1);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, tasks) = send(&app, "GET", &format!("/api/leads/{}/tasks", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tasks.as_array().unwrap().len(), 1);
    assert_eq!(tasks[0]["description"], "Day 1 Follow-up");
}

#[tokio::test]
async fn test_created_leads_start_even_when_listener_lags() {
    // A one-slot bus overflows on the first burst of writes
    let app = create_test_app_with_bus(EventBus::new(1)).await;

    let mut ids = Vec::new();
    for n in 0..10 {
        let (status, body) = send(&app, "POST", "/api/leads", Some(json!({ "name": format!("Burst {}", n) }))).await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(body["id"].as_str().unwrap().to_string());
    }

    let mut conn = app.pool.acquire().await.unwrap();
    for id in &ids {
        let lead = leads::load_lead(&mut conn, &id.as_str().into()).await.unwrap().unwrap();
        assert_eq!(lead.status, Some(LeadStatus::Active), "lead {} not started", id);
        assert_eq!(lead.afc_step, 1);
        let open = tasks::open_tasks_for_lead(&mut conn, &lead.id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, TaskKind::FollowUp { step: 1 });
    }
    assert!(leads::leads_without_status(&mut conn).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_and_not_found_errors_are_structured() {
    let app = create_test_app().await;

    let (status, body) = send(&app, "POST", "/api/leads", Some(json!({ "name": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid-argument");

    let (status, body) = send(&app, "POST", "/api/leads", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid-argument");

    let (status, body) = send(&app, "GET", "/api/leads/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not-found");

    let (status, body) = send(
        &app,
        "POST",
        "/api/leads/missing/interactions",
        Some(json!({ "type": "feedback", "feedback": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not-found");
}

#[tokio::test]
async fn test_logged_interaction_advances_cycle() {
    let app = create_test_app().await;
    let mut lead = Lead::new("Sami", Utc::now());
    lead.status = Some(LeadStatus::Active);
    lead.afc_step = 1;
    insert_lead(&app.pool, &lead).await;
    insert_task(
        &app.pool,
        &Task::new(
            lead.id.clone(),
            "Sami",
            TaskKind::FollowUp { step: 1 },
            "Day 1 Follow-up",
            Some(Utc::now()),
            Utc::now(),
        ),
    )
    .await;

    let payload = json!({
        "id": "call-1",
        "type": "quickLog",
        "quickLogType": "Unresponsive",
        "notes": "no answer"
    });
    let uri = format!("/api/leads/{}/interactions", lead.id);
    let (status, body) = send(&app, "POST", &uri, Some(payload.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "applied");
    assert_eq!(body["summary"]["afcStepAfter"], 2);

    // Same id again is a redelivery
    let (status, body) = send(&app, "POST", &uri, Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "duplicate");

    let open = open_tasks(&app.pool, lead.id.as_str()).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].kind, TaskKind::FollowUp { step: 2 });
}

#[tokio::test]
async fn test_completing_info_task_restarts_cycle() {
    let app = create_test_app().await;
    let mut lead = Lead::new("Dina", Utc::now());
    lead.status = Some(LeadStatus::Active);
    insert_lead(&app.pool, &lead).await;

    let uri = format!("/api/leads/{}/interactions", lead.id);
    let (status, _) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "type": "outcome", "outcome": "Info", "notes": "Send syllabus" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let open = open_tasks(&app.pool, lead.id.as_str()).await;
    let info = open.iter().find(|t| t.kind == TaskKind::InfoRequest).unwrap();
    assert_eq!(info.description, "Send syllabus");

    let (status, body) = send(&app, "POST", &format!("/api/tasks/{}/complete", info.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completed"], true);

    let mut conn = app.pool.acquire().await.unwrap();
    let restarted = leads::load_lead(&mut conn, &lead.id).await.unwrap().unwrap();
    assert_eq!(restarted.afc_step, 1);
    assert_eq!(restarted.interactions.len(), 2);
    assert!(restarted.interactions.last().unwrap().notes_str().contains("Send syllabus"));
}

#[tokio::test]
async fn test_import_dry_run_then_commit() {
    let app = create_test_app().await;
    let rows = json!([
        { "name": "Alia", "email": "alia@x.com", "d1course": "Python", "d1price": "900" },
        { "name": "Alia again", "email": "ALIA@x.com" },
        { "name": "" },
        { "name": "Basel", "phone1": "050-111-2222", "relationship": "Learner" }
    ]);

    let (status, body) = send(
        &app,
        "POST",
        "/api/import",
        Some(json!({ "rows": rows, "mode": "insertOnly", "dryRun": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 2);
    assert_eq!(body["skipped"], 2);
    assert_eq!(body["preview"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "POST", "/api/import", Some(json!({ "rows": rows }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 2);
    assert!(body.get("preview").is_none());
    assert_eq!(body["skippedRows"][0]["row"], 2);

    let mut conn = app.pool.acquire().await.unwrap();
    assert_eq!(leads::count_leads(&mut conn).await.unwrap(), 2);
}

#[tokio::test]
async fn test_merge_and_bulk_delete() {
    let app = create_test_app().await;
    let mut primary = Lead::new("Primary", Utc::now());
    primary.status = Some(LeadStatus::Active);
    let mut secondary = Lead::new("Secondary", Utc::now());
    secondary.status = Some(LeadStatus::Active);
    insert_lead(&app.pool, &primary).await;
    insert_lead(&app.pool, &secondary).await;
    insert_task(
        &app.pool,
        &Task::new(
            secondary.id.clone(),
            "Secondary",
            TaskKind::InfoRequest,
            "Send fees",
            Some(Utc::now() + Duration::days(1)),
            Utc::now(),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/merge",
        Some(json!({ "primaryId": primary.id.as_str(), "secondaryId": primary.id.as_str() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid-argument");

    let (status, body) = send(
        &app,
        "POST",
        "/api/merge",
        Some(json!({ "primaryId": primary.id.as_str(), "secondaryId": secondary.id.as_str() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tasksReparented"], 1);

    // The merged-away lead's tasks survive on the primary, even once the
    // listener has seen the lead-deleted event
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(open_tasks(&app.pool, primary.id.as_str()).await.len(), 1);

    let (status, body) = send(
        &app,
        "POST",
        "/api/leads/bulk-delete",
        Some(json!({ "ids": [primary.id.as_str(), "ghost"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
    assert_eq!(body["notFound"], json!(["ghost"]));

    assert_eq!(body["tasksDeleted"], 1);

    let mut conn = app.pool.acquire().await.unwrap();
    assert!(tasks::tasks_for_lead(&mut conn, &primary.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_endpoint_processes_overdue_tasks() {
    let app = create_test_app().await;
    let mut lead = Lead::new("Overdue", Utc::now());
    lead.status = Some(LeadStatus::Active);
    lead.afc_step = 1;
    insert_lead(&app.pool, &lead).await;
    insert_task(
        &app.pool,
        &Task::new(
            lead.id.clone(),
            "Overdue",
            TaskKind::FollowUp { step: 1 },
            "Day 1 Follow-up",
            Some(Utc::now() - Duration::hours(3)),
            Utc::now(),
        ),
    )
    .await;

    let (status, body) = send(&app, "POST", "/api/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overdue"], 1);
    assert_eq!(body["processed"], 1);

    let (status, body) = send(&app, "POST", "/api/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overdue"], 0);
}

#[tokio::test]
async fn test_payment_plan_replacement_creates_reminders() {
    let app = create_test_app().await;
    let mut lead = Lead::new("Payer", Utc::now());
    lead.status = Some(LeadStatus::Enrolled);
    insert_lead(&app.pool, &lead).await;

    let due = (Utc::now() + Duration::days(30)).to_rfc3339();
    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/leads/{}/payment-plan", lead.id),
        Some(json!({ "installments": [{ "id": "inst-1", "amount": 2500.0, "dueDate": due }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paymentPlan"]["installments"][0]["id"], "inst-1");

    let reminders = open_tasks(&app.pool, lead.id.as_str()).await;
    assert_eq!(reminders.len(), 1);
    assert!(reminders[0].description.starts_with("Payment reminder: 2500.00"));
}
