use std::sync::Arc;

use axum::http::StatusCode;
use chrono::TimeZone;
use http_body_util::BodyExt;
use tower::ServiceExt;

use orchestrations_core::clock::{Clock, ManualClock};
use orchestrations_core::config::Config;
use orchestrations_core::register::OrchestrationRegister;
use orchestrations_core::store::{MemoryStore, OrchestrationStore, RedbStore};
use orchestrations_server::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
}

/// Router over a store synchronized with the deployment catalog.
fn synced_app_with(store: Arc<dyn OrchestrationStore>) -> axum::Router {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
    let register = OrchestrationRegister::new(store.clone(), clock.clone());
    register
        .synchronize(&orchestrations_server::catalog::declared().unwrap())
        .unwrap();
    orchestrations_server::build_router(AppState::new(
        store,
        clock,
        register.health(),
        &Config::default(),
    ))
}

fn synced_app() -> axum::Router {
    synced_app_with(Arc::new(MemoryStore::new()))
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_503_before_synchronization() {
    let store: Arc<dyn OrchestrationStore> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
    let register = OrchestrationRegister::new(store.clone(), clock.clone());
    let app = orchestrations_server::build_router(AppState::new(
        store,
        clock,
        register.health(),
        &Config::default(),
    ));

    let (status, body) = get(app, "/api/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn health_is_200_after_synchronization() {
    let (status, body) = get(synced_app(), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["synchronized_at"].is_string());
    assert!(body.get("error").is_none());
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_orchestrations_returns_catalog() {
    let (status, body) = get(synced_app(), "/api/orchestrations").await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 4);
    let brs_045 = list.iter().find(|d| d["name"] == "Brs_045").unwrap();
    assert_eq!(brs_045["recurring_cron_expression"], "0 2 * * 1-5");
    assert_eq!(brs_045["steps"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_is_idempotent_per_key() {
    let app = synced_app();
    let body = serde_json::json!({
        "actor": "actor-5790001330583",
        "idempotency_key": "message-17",
        "parameter_value": {"business_reason": "D05"},
    });

    let (status, first) =
        post_json(app.clone(), "/api/orchestrations/Brs_026/1/instances", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["lifecycle"]["state"], "not_started");
    assert_eq!(first["created_by"], "actor-5790001330583");

    let (status, second) =
        post_json(app.clone(), "/api/orchestrations/Brs_026/1/instances", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);

    let (_, list) = get(app, "/api/instances?orchestration=Brs_026:1").await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn start_unknown_orchestration_is_404() {
    let (status, body) = post_json(
        synced_app(),
        "/api/orchestrations/Brs_999/1/instances",
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Brs_999:1"));
}

#[tokio::test]
async fn skipping_a_fixed_step_is_422() {
    let (status, _) = post_json(
        synced_app(),
        "/api/orchestrations/Brs_023_027/1/instances",
        serde_json::json!({"skip_step_sequences": [1]}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn schedule_then_cancel() {
    let app = synced_app();
    let (status, scheduled) = post_json(
        app.clone(),
        "/api/orchestrations/Brs_023_027/1/schedule",
        serde_json::json!({
            "run_at": "2024-01-03T08:00:00Z",
            "skip_step_sequences": [2],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(scheduled["scheduled_to_run_at"], "2024-01-03T08:00:00Z");
    let id = scheduled["id"].as_str().unwrap().to_string();

    let (status, cancelled) =
        post_json(app.clone(), &format!("/api/instances/{id}/cancel"), serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["lifecycle"]["state"], "terminated");
    assert_eq!(cancelled["lifecycle"]["outcome"], "user_canceled");

    let (status, _) =
        post_json(app, &format!("/api/instances/{id}/cancel"), serde_json::json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn schedule_non_schedulable_is_422() {
    let (status, _) = post_json(
        synced_app(),
        "/api/orchestrations/Brs_026/1/schedule",
        serde_json::json!({"run_at": "2024-01-03T08:00:00Z"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn notify_appends_to_instance() {
    let app = synced_app();
    let (_, created) = post_json(
        app.clone(),
        "/api/orchestrations/Brs_026/1/instances",
        serde_json::json!({}),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, notified) = post_json(
        app.clone(),
        &format!("/api/instances/{id}/notify"),
        serde_json::json!({"event": "EnqueueActorMessagesCompleted", "data": {"success": true}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notified["notifications"][0]["event"], "EnqueueActorMessagesCompleted");

    let (status, fetched) = get(app, &format!("/api/instances/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["notifications"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn notify_unknown_instance_is_404() {
    let id = uuid::Uuid::new_v4();
    let (status, _) = post_json(
        synced_app(),
        &format!("/api/instances/{id}/notify"),
        serde_json::json!({"event": "Anything"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notify_without_event_is_400() {
    let id = uuid::Uuid::new_v4();
    let (status, _) = post_json(
        synced_app(),
        &format!("/api/instances/{id}/notify"),
        serde_json::json!({"event": " "}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redb_backed_router_persists_instances() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("orchestrations.redb");
    let id = {
        let store: Arc<dyn OrchestrationStore> = Arc::new(RedbStore::open(&path).unwrap());
        let (status, created) = post_json(
            synced_app_with(store),
            "/api/orchestrations/Brs_028/1/instances",
            serde_json::json!({"idempotency_key": "message-28"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        created["id"].as_str().unwrap().to_string()
    };

    let store: Arc<dyn OrchestrationStore> = Arc::new(RedbStore::open(&path).unwrap());
    let (status, fetched) = get(synced_app_with(store), &format!("/api/instances/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["idempotency_key"], "message-28");
}
