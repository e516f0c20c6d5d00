use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use planboard::api::router;
use planboard::db;
use planboard::state::AppState;
use planboard::sync::NoopTaskProvider;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn app() -> Router {
    let pool = db::connect_in_memory().await.expect("Failed to create test db");
    router(AppState::new(pool, Arc::new(NoopTaskProvider)))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = app.clone().oneshot(request).await.expect("Request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Body is not JSON")
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, _) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_task_crud_and_filters() {
    let app = app().await;

    let (status, project) = send(&app, Method::POST, "/projects", Some(json!({ "name": "Work" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let project_id = project["id"].as_str().unwrap().to_string();

    let (status, tag) = send(&app, Method::POST, "/tags", Some(json!({ "name": "urgent" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let tag_id = tag["id"].as_str().unwrap().to_string();

    let (status, task) = send(
        &app,
        Method::POST,
        "/tasks",
        Some(json!({
            "title": "Write report",
            "priority": "HIGH",
            "project_id": project_id,
            "tag_ids": [tag_id]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["status"], "TODO");
    assert_eq!(task["tags"][0]["name"], "urgent");
    let task_id = task["id"].as_str().unwrap().to_string();

    send(&app, Method::POST, "/tasks", Some(json!({ "title": "Unrelated" }))).await;

    let (_, by_tag) = send(&app, Method::GET, &format!("/tasks?tag_id={tag_id}"), None).await;
    assert_eq!(by_tag.as_array().unwrap().len(), 1);
    let (_, by_text) = send(&app, Method::GET, "/tasks?q=report", None).await;
    assert_eq!(by_text[0]["id"], task_id.as_str());

    let (status, updated) = send(
        &app,
        Method::PATCH,
        &format!("/tasks/{task_id}"),
        Some(json!({ "description": "two pages", "priority": null })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "two pages");
    assert_eq!(updated["priority"], Value::Null);

    let (status, done) = send(&app, Method::POST, &format!("/tasks/{task_id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "COMPLETED");

    let (_, open) = send(&app, Method::GET, "/tasks?status=TODO,IN_PROGRESS", None).await;
    assert_eq!(open.as_array().unwrap().len(), 1);

    let (_, projects) = send(&app, Method::GET, "/projects", None).await;
    assert_eq!(projects[0]["task_count"], 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::GET, &format!("/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
}

#[tokio::test]
async fn test_validation_errors() {
    let app = app().await;

    let (status, body) = send(&app, Method::POST, "/tasks", Some(json!({ "title": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (status, _) = send(
        &app,
        Method::POST,
        "/tasks",
        Some(json!({ "title": "Bad rule", "is_recurring": true, "recurrence_rule": "FREQ=HOURLY" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/tasks?status=SOMEDAY", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::PATCH, "/tasks/missing", Some(json!({ "title": "x" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, Method::POST, "/tags", Some(json!({ "name": "dup" }))).await;
    let (status, _) = send(&app, Method::POST, "/tags", Some(json!({ "name": "dup" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_settings_events_and_schedule() {
    let app = app().await;

    let (status, defaults) = send(&app, Method::GET, "/settings/auto-schedule", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults["work_hour_start"], 9);

    let mut every_day = defaults.clone();
    every_day["work_days"] = json!([7, 1, 2, 3, 4, 5, 6, 1]);
    every_day["work_hour_start"] = json!(0);
    every_day["work_hour_end"] = json!(24);
    let (status, saved) = send(&app, Method::PUT, "/settings/auto-schedule", Some(every_day)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["work_days"], json!([1, 2, 3, 4, 5, 6, 7]));

    let mut invalid = saved.clone();
    invalid["work_hour_end"] = json!(0);
    let (status, _) = send(&app, Method::PUT, "/settings/auto-schedule", Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/events",
        Some(json!({
            "title": "Backwards",
            "starts_at": "2026-03-02T10:00:00Z",
            "ends_at": "2026-03-02T09:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, event) = send(
        &app,
        Method::POST,
        "/events",
        Some(json!({
            "title": "Offsite",
            "starts_at": "2026-03-02T09:00:00Z",
            "ends_at": "2026-03-02T17:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, in_range) = send(
        &app,
        Method::GET,
        "/events?from=2026-03-02T12:00:00Z&to=2026-03-03T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(in_range.as_array().unwrap().len(), 1);
    let (status, _) = send(&app, Method::DELETE, &format!("/events/{}", event["id"].as_str().unwrap()), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, task) = send(
        &app,
        Method::POST,
        "/tasks",
        Some(json!({ "title": "Plan me", "duration": 60, "is_auto_scheduled": true })),
    )
    .await;
    let task_id = task["id"].as_str().unwrap().to_string();

    let (status, result) = send(&app, Method::POST, "/schedule", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["scheduled"][0]["task_id"], task_id.as_str());
    assert_eq!(result["unscheduled"], json!([]));

    let (status, locked) = send(&app, Method::POST, &format!("/tasks/{task_id}/lock"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(locked["schedule_locked"], true);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/tasks/{task_id}/postpone"),
        Some(json!({ "until": "2999-01-01T00:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(&app, Method::POST, &format!("/tasks/{task_id}/unlock"), None).await;
    let (status, postponed) = send(
        &app,
        Method::POST,
        &format!("/tasks/{task_id}/postpone"),
        Some(json!({ "until": "2999-01-01T00:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(postponed["scheduled_start"], Value::Null);
}

#[tokio::test]
async fn test_sync_endpoints() {
    let app = app().await;

    let (_, project) = send(&app, Method::POST, "/projects", Some(json!({ "name": "Synced" }))).await;
    let project_id = project["id"].as_str().unwrap().to_string();

    let (status, mapping) = send(
        &app,
        Method::POST,
        "/sync/mappings",
        Some(json!({ "provider": "NOTION", "external_list_id": "db-1", "project_id": project_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(mapping["direction"], "BIDIRECTIONAL");
    let mapping_id = mapping["id"].as_str().unwrap().to_string();

    let (_, task) = send(
        &app,
        Method::POST,
        "/tasks",
        Some(json!({ "title": "Tracked", "project_id": project_id })),
    )
    .await;
    let task_id = task["id"].as_str().unwrap().to_string();

    let (_, pending) = send(&app, Method::GET, "/sync/changes", None).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["change_type"], "CREATE");

    // No provider is configured, so syncing must leave everything queued.
    let (status, stats) = send(&app, Method::POST, "/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["mappings"], 0);
    assert_eq!(stats["pushed_created"], 0);
    assert_eq!(stats["pulled_deleted"], 0);

    let (_, pending) = send(&app, Method::GET, "/sync/changes", None).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::POST, "/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, kept) = send(&app, Method::GET, &format!("/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kept["external_task_id"], Value::Null);

    let (status, history) = send(&app, Method::GET, &format!("/tasks/{task_id}/changes"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history[0]["synced"], false);

    let (status, _) = send(&app, Method::GET, "/tasks/missing/changes", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::DELETE, &format!("/sync/mappings/{mapping_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::DELETE, &format!("/sync/mappings/{mapping_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
