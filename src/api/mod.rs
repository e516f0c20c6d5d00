use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::{delete, patch, post};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::db::{changes, events, mappings, projects, settings, tags, tasks};
use crate::error::AppError;
use crate::models::*;
use crate::services::{ScheduleResult, ScheduleService, SyncService, SyncStats};
use crate::state::AppState;

#[derive(Deserialize)]
struct ProjectQueryParams {
    status: Option<ProjectStatus>,
}

#[derive(Deserialize)]
struct PostponeRequest {
    until: DateTime<Utc>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{id}", patch(update_project).delete(delete_project))
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/{id}", patch(update_tag).delete(delete_tag))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task).patch(update_task).delete(delete_task))
        .route("/tasks/{id}/complete", post(complete_task))
        .route("/tasks/{id}/lock", post(lock_task))
        .route("/tasks/{id}/unlock", post(unlock_task))
        .route("/tasks/{id}/postpone", post(postpone_task))
        .route("/tasks/{id}/changes", get(task_changes))
        .route("/events", get(list_events).post(create_event))
        .route("/events/{id}", delete(delete_event))
        .route("/settings/auto-schedule", get(get_settings).put(put_settings))
        .route("/schedule", post(schedule_now))
        .route("/sync", post(sync_now))
        .route("/sync/mappings", get(list_mappings).post(create_mapping))
        .route("/sync/mappings/{id}", delete(delete_mapping))
        .route("/sync/changes", get(pending_changes))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

fn deleted(ok: bool) -> Result<StatusCode, AppError> {
    if ok {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

async fn list_projects(
    State(state): State<AppState>,
    Query(params): Query<ProjectQueryParams>,
) -> Result<Json<Vec<Project>>, AppError> {
    let projects = projects::fetch_projects(&state.db, params.status).await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<NewProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = projects::insert_project(&state.db, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    let project = projects::update_project(&state.db, &id, req, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    deleted(projects::delete_project(&state.db, &id).await?)
}

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, AppError> {
    let tags = tags::fetch_tags(&state.db).await?;
    Ok(Json(tags))
}

async fn create_tag(
    State(state): State<AppState>,
    Json(req): Json<NewTagRequest>,
) -> Result<(StatusCode, Json<Tag>), AppError> {
    let tag = tags::insert_tag(&state.db, req).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn update_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTagRequest>,
) -> Result<Json<Tag>, AppError> {
    let tag = tags::update_tag(&state.db, &id, req)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(tag))
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    deleted(tags::delete_tag(&state.db, &id).await?)
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = tasks::fetch_tasks(&state.db, &filter).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::find_task(&state.db, &id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let task = tasks::insert_task(&state.db, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::update_task(&state.db, &id, req, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    deleted(tasks::delete_task(&state.db, &id, Utc::now()).await?)
}

async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::complete_task(&state.db, &id, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn lock_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::set_schedule_lock(&state.db, &id, true, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn unlock_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::set_schedule_lock(&state.db, &id, false, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn postpone_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PostponeRequest>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::postpone_task(&state.db, &id, req.until, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn task_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskChange>>, AppError> {
    tasks::find_task(&state.db, &id).await?.ok_or(AppError::NotFound)?;
    let changes = changes::fetch_changes_for_task(&state.db, &id).await?;
    Ok(Json(changes))
}

async fn list_events(
    State(state): State<AppState>,
    Query(range): Query<EventRange>,
) -> Result<Json<Vec<CalendarEvent>>, AppError> {
    let events = events::fetch_events(&state.db, &range).await?;
    Ok(Json(events))
}

async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<NewEventRequest>,
) -> Result<(StatusCode, Json<CalendarEvent>), AppError> {
    let event = events::insert_event(&state.db, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    deleted(events::delete_event(&state.db, &id).await?)
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<AutoScheduleSettings>, AppError> {
    let settings = settings::load_settings(&state.db).await?;
    Ok(Json(settings))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(req): Json<AutoScheduleSettings>,
) -> Result<Json<AutoScheduleSettings>, AppError> {
    let settings = settings::save_settings(&state.db, req, Utc::now()).await?;
    Ok(Json(settings))
}

async fn schedule_now(State(state): State<AppState>) -> Result<Json<ScheduleResult>, AppError> {
    let service = ScheduleService::new(state.db.clone());
    let result = service.schedule_all(Utc::now()).await?;
    Ok(Json(result))
}

async fn sync_now(State(state): State<AppState>) -> Result<Json<SyncStats>, AppError> {
    let service = SyncService::new(state.db.clone(), state.provider.clone(), state.sync_lock.clone());
    let stats = service.sync_all().await?;
    Ok(Json(stats))
}

async fn list_mappings(State(state): State<AppState>) -> Result<Json<Vec<TaskListMapping>>, AppError> {
    let mappings = mappings::fetch_mappings(&state.db).await?;
    Ok(Json(mappings))
}

async fn create_mapping(
    State(state): State<AppState>,
    Json(req): Json<NewMappingRequest>,
) -> Result<(StatusCode, Json<TaskListMapping>), AppError> {
    let mapping = mappings::insert_mapping(&state.db, req, Utc::now()).await?;
    if !state.provider.is_configured() {
        warn!("Mapping {} created, but no task provider is configured; it will not sync", mapping.id);
    }
    Ok((StatusCode::CREATED, Json(mapping)))
}

async fn delete_mapping(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    deleted(mappings::delete_mapping(&state.db, &id).await?)
}

async fn pending_changes(State(state): State<AppState>) -> Result<Json<Vec<TaskChange>>, AppError> {
    let changes = changes::fetch_all_pending_changes(&state.db).await?;
    Ok(Json(changes))
}
