use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::db::{changes, mappings};
use crate::error::AppError;
use crate::models::{
    ChangeType, ExternalTask, NewTaskRequest, Tag, Task, TaskFilter, TaskSource, TaskStatus,
    UpdateTaskRequest,
};
use crate::recurrence::{self, RecurrenceRule};
use crate::scheduling::Placement;

const TASK_COLUMNS: &str = "id, title, description, status, due_date, start_date, duration, \
    priority, energy_level, preferred_time, project_id, is_recurring, recurrence_rule, \
    last_completed_date, completed_at, is_auto_scheduled, schedule_locked, scheduled_start, \
    scheduled_end, schedule_score, last_scheduled, postponed_until, external_task_id, source, \
    external_list_id, last_synced_at, created_at, updated_at";

const MAX_DURATION_MINUTES: i32 = 24 * 60;

pub async fn fetch_tasks(db: &SqlitePool, filter: &TaskFilter) -> Result<Vec<Task>, AppError> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1"));

    if let Some(raw) = filter.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let statuses = raw
            .split(',')
            .map(|s| {
                TaskStatus::parse(s).ok_or_else(|| AppError::BadRequest(format!("unknown status '{}'", s.trim())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status);
        }
        separated.push_unseparated(")");
    }
    if let Some(project_id) = &filter.project_id {
        builder.push(" AND project_id = ").push_bind(project_id.clone());
    }
    if let Some(tag_id) = &filter.tag_id {
        builder
            .push(" AND id IN (SELECT task_id FROM task_tags WHERE tag_id = ")
            .push_bind(tag_id.clone())
            .push(")");
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        builder
            .push(" AND title LIKE ")
            .push_bind(format!("%{}%", q.replace('%', "\\%").replace('_', "\\_")))
            .push(" ESCAPE '\\'");
    }
    if let Some(auto) = filter.auto_scheduled {
        builder.push(" AND is_auto_scheduled = ").push_bind(auto);
    }
    builder.push(" ORDER BY due_date IS NULL, due_date, created_at");

    let mut tasks = builder.build_query_as::<Task>().fetch_all(db).await?;
    attach_tags(db, &mut tasks).await?;
    Ok(tasks)
}

/// Every task, for planning runs.
pub async fn fetch_all_tasks(db: &SqlitePool) -> Result<Vec<Task>, sqlx::Error> {
    sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks"))
        .fetch_all(db)
        .await
}

pub async fn find_task(db: &SqlitePool, id: &str) -> Result<Option<Task>, sqlx::Error> {
    let mut conn = db.acquire().await?;
    find_task_conn(&mut conn, id).await
}

async fn find_task_conn(conn: &mut SqliteConnection, id: &str) -> Result<Option<Task>, sqlx::Error> {
    let task = sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match task {
        Some(mut task) => {
            task.tags = sqlx::query_as::<_, Tag>(
                "SELECT t.id, t.name, t.color FROM tags t JOIN task_tags tt ON tt.tag_id = t.id WHERE tt.task_id = ? ORDER BY t.name",
            )
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

pub async fn insert_task(
    db: &SqlitePool,
    req: NewTaskRequest,
    now: DateTime<Utc>,
) -> Result<Task, AppError> {
    let mut task = Task {
        id: Uuid::new_v4().to_string(),
        title: require_title(&req.title)?,
        description: req.description,
        status: TaskStatus::Todo,
        due_date: req.due_date,
        start_date: req.start_date,
        duration: req.duration,
        priority: req.priority,
        energy_level: req.energy_level,
        preferred_time: req.preferred_time,
        project_id: req.project_id,
        tags: Vec::new(),
        is_recurring: req.is_recurring,
        recurrence_rule: req.recurrence_rule,
        last_completed_date: None,
        completed_at: None,
        is_auto_scheduled: req.is_auto_scheduled,
        schedule_locked: false,
        scheduled_start: None,
        scheduled_end: None,
        schedule_score: None,
        last_scheduled: None,
        postponed_until: None,
        external_task_id: None,
        source: TaskSource::Local,
        external_list_id: None,
        last_synced_at: None,
        created_at: now,
        updated_at: now,
    };
    validate_fields(&task)?;
    if let Some(status) = req.status {
        apply_status(&mut task, status, now)?;
    }

    let mut tx = db.begin().await?;
    ensure_project_exists(&mut tx, task.project_id.as_deref()).await?;
    ensure_tags_exist(&mut tx, &req.tag_ids).await?;

    insert_row(&mut tx, &task).await?;
    replace_tags(&mut tx, &task.id, &req.tag_ids).await?;

    if let Some(project_id) = task.project_id.as_deref() {
        if let Some(mapping) = mappings::find_mapping_for_project(&mut tx, project_id).await? {
            changes::record_change(
                &mut tx,
                &task.id,
                Some(&mapping.id),
                ChangeType::Create,
                sync_snapshot(&task),
                now,
            )
            .await?;
        }
    }

    let created = find_task_conn(&mut tx, &task.id)
        .await?
        .ok_or(AppError::InternalServerError)?;
    tx.commit().await?;

    debug!("created task {}", created.id);
    Ok(created)
}

pub async fn update_task(
    db: &SqlitePool,
    id: &str,
    req: UpdateTaskRequest,
    now: DateTime<Utc>,
) -> Result<Option<Task>, AppError> {
    let mut tx = db.begin().await?;
    let Some(before) = find_task_conn(&mut tx, id).await? else {
        return Ok(None);
    };

    let mut task = before.clone();
    if let Some(title) = req.title {
        task.title = require_title(&title)?;
    }
    if let Some(description) = req.description {
        task.description = description;
    }
    if let Some(due_date) = req.due_date {
        task.due_date = due_date;
    }
    if let Some(start_date) = req.start_date {
        task.start_date = start_date;
    }
    if let Some(duration) = req.duration {
        task.duration = duration;
    }
    if let Some(priority) = req.priority {
        task.priority = priority;
    }
    if let Some(energy_level) = req.energy_level {
        task.energy_level = energy_level;
    }
    if let Some(preferred_time) = req.preferred_time {
        task.preferred_time = preferred_time;
    }
    if let Some(project_id) = req.project_id {
        ensure_project_exists(&mut tx, project_id.as_deref()).await?;
        task.project_id = project_id;
    }
    if let Some(is_recurring) = req.is_recurring {
        task.is_recurring = is_recurring;
    }
    if let Some(rule) = req.recurrence_rule {
        task.recurrence_rule = rule;
    }
    if let Some(is_auto_scheduled) = req.is_auto_scheduled {
        task.is_auto_scheduled = is_auto_scheduled;
        if !is_auto_scheduled && !task.schedule_locked {
            task.clear_schedule();
        }
    }
    validate_fields(&task)?;
    if let Some(status) = req.status {
        apply_status(&mut task, status, now)?;
    }
    if let Some(tag_ids) = &req.tag_ids {
        ensure_tags_exist(&mut tx, tag_ids).await?;
        replace_tags(&mut tx, id, tag_ids).await?;
    }
    task.updated_at = now;

    track_changes(&mut tx, &before, &mut task, now).await?;
    write_row(&mut tx, &task).await?;

    let updated = find_task_conn(&mut tx, id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Marks a task done. Recurring tasks roll forward to their next occurrence.
pub async fn complete_task(
    db: &SqlitePool,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Task>, AppError> {
    let req = UpdateTaskRequest {
        status: Some(TaskStatus::Completed),
        ..Default::default()
    };
    update_task(db, id, req, now).await
}

pub async fn delete_task(db: &SqlitePool, id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
    let mut tx = db.begin().await?;
    let Some(task) = find_task_conn(&mut tx, id).await? else {
        return Ok(false);
    };

    if let Some(project_id) = task.project_id.as_deref() {
        if let Some(mapping) = mappings::find_mapping_for_project(&mut tx, project_id).await? {
            changes::record_change(
                &mut tx,
                &task.id,
                Some(&mapping.id),
                ChangeType::Delete,
                json!({ "external_task_id": task.external_task_id }),
                now,
            )
            .await?;
        }
    }

    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn set_schedule_lock(
    db: &SqlitePool,
    id: &str,
    locked: bool,
    now: DateTime<Utc>,
) -> Result<Option<Task>, AppError> {
    let Some(task) = find_task(db, id).await? else {
        return Ok(None);
    };
    if locked && (task.scheduled_start.is_none() || task.scheduled_end.is_none()) {
        return Err(AppError::BadRequest("only a scheduled task can be locked".to_string()));
    }

    sqlx::query("UPDATE tasks SET schedule_locked = ?, updated_at = ? WHERE id = ?")
        .bind(locked)
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;

    Ok(find_task(db, id).await?)
}

/// Keeps the scheduler away from the task until `until`.
pub async fn postpone_task(
    db: &SqlitePool,
    id: &str,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<Task>, AppError> {
    let Some(mut task) = find_task(db, id).await? else {
        return Ok(None);
    };
    if until <= now {
        return Err(AppError::BadRequest("postpone target must be in the future".to_string()));
    }
    if task.schedule_locked {
        return Err(AppError::Conflict("task schedule is locked".to_string()));
    }

    task.postponed_until = Some(until);
    task.clear_schedule();
    task.updated_at = now;

    let mut conn = db.acquire().await?;
    write_row(&mut conn, &task).await?;
    Ok(Some(task))
}

/// Persists a planning run. Scheduling output is not a user edit, so
/// `updated_at` and the change log are left alone.
pub async fn save_schedule(
    db: &SqlitePool,
    placements: &[Placement],
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;
    for placement in placements {
        sqlx::query(
            "UPDATE tasks SET scheduled_start = ?, scheduled_end = ?, schedule_score = ?, last_scheduled = ? WHERE id = ?",
        )
        .bind(placement.slot.map(|s| s.start))
        .bind(placement.slot.map(|s| s.end))
        .bind(placement.score)
        .bind(now)
        .bind(&placement.task_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

/// Tasks of a project that are linked to an external task.
pub async fn fetch_mapped_tasks(db: &SqlitePool, project_id: &str) -> Result<Vec<Task>, sqlx::Error> {
    sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ? AND external_task_id IS NOT NULL"
    ))
    .bind(project_id)
    .fetch_all(db)
    .await
}

/// Inserts a task pulled from a provider without recording a change.
pub async fn insert_synced_task(db: &SqlitePool, task: &Task) -> Result<(), sqlx::Error> {
    let mut conn = db.acquire().await?;
    insert_row(&mut conn, task).await
}

/// Overwrites the synced fields with the provider's version.
pub async fn apply_remote_update(
    db: &SqlitePool,
    task: &Task,
    remote: &ExternalTask,
    now: DateTime<Utc>,
) -> Result<Task, sqlx::Error> {
    let mut updated = task.clone();
    updated.title = remote.title.clone();
    updated.description = remote.description.clone();
    updated.status = remote.status;
    updated.due_date = remote.due_date;
    updated.priority = remote.priority;
    updated.completed_at = match remote.status {
        // Providers report an edit time, not the moment the task was finished.
        TaskStatus::Completed if task.status == TaskStatus::Completed => {
            task.completed_at.or(remote.completed_at).or(Some(now))
        }
        TaskStatus::Completed => remote.completed_at.or(Some(now)),
        _ => None,
    };
    if !updated.status.is_open() {
        updated.clear_schedule();
    }
    updated.updated_at = now;
    updated.last_synced_at = Some(now);

    let mut conn = db.acquire().await?;
    write_row(&mut conn, &updated).await?;
    Ok(updated)
}

pub async fn mark_task_synced(
    db: &SqlitePool,
    id: &str,
    external_task_id: &str,
    external_list_id: &str,
    source: TaskSource,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE tasks SET external_task_id = ?, external_list_id = ?, source = ?, last_synced_at = ? WHERE id = ?",
    )
    .bind(external_task_id)
    .bind(external_list_id)
    .bind(source)
    .bind(now)
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

/// Removes a task the provider no longer has, without recording a change.
pub async fn delete_task_silently(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Queues a CREATE for every task of a project that just got mapped.
/// Links left over from an earlier mapping are dropped first.
pub(crate) async fn queue_project_tasks(
    conn: &mut SqliteConnection,
    project_id: &str,
    mapping_id: &str,
    now: DateTime<Utc>,
) -> Result<usize, sqlx::Error> {
    sqlx::query(
        "UPDATE tasks SET external_task_id = NULL, external_list_id = NULL, source = 'LOCAL', last_synced_at = NULL WHERE project_id = ?",
    )
    .bind(project_id)
    .execute(&mut *conn)
    .await?;

    let tasks = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ? ORDER BY created_at"
    ))
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    for task in &tasks {
        changes::record_change(conn, &task.id, Some(mapping_id), ChangeType::Create, sync_snapshot(task), now)
            .await?;
    }
    Ok(tasks.len())
}

/// The fields an external provider stores.
pub fn sync_snapshot(task: &Task) -> Value {
    json!({
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "due_date": task.due_date,
        "priority": task.priority,
        "completed_at": task.completed_at,
    })
}

fn changed_fields(before: &Value, after: &Value) -> Map<String, Value> {
    let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
        return Map::new();
    };
    after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Records sync changes for a user edit. Moving a task between projects
/// deletes it from the old list and creates it in the new one.
async fn track_changes(
    conn: &mut SqliteConnection,
    before: &Task,
    after: &mut Task,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let old_mapping = match before.project_id.as_deref() {
        Some(project_id) => mappings::find_mapping_for_project(conn, project_id).await?,
        None => None,
    };
    let new_mapping = match after.project_id.as_deref() {
        Some(project_id) => mappings::find_mapping_for_project(conn, project_id).await?,
        None => None,
    };

    match (old_mapping, new_mapping) {
        (Some(old), Some(new)) if old.id == new.id => {
            let diff = changed_fields(&sync_snapshot(before), &sync_snapshot(after));
            if !diff.is_empty() {
                changes::record_change(conn, &after.id, Some(&new.id), ChangeType::Update, Value::Object(diff), now)
                    .await?;
            }
        }
        (old, new) => {
            if let Some(old) = old {
                changes::record_change(
                    conn,
                    &after.id,
                    Some(&old.id),
                    ChangeType::Delete,
                    json!({ "external_task_id": before.external_task_id }),
                    now,
                )
                .await?;
                after.external_task_id = None;
                after.external_list_id = None;
                after.source = TaskSource::Local;
                after.last_synced_at = None;
            }
            if let Some(new) = new {
                changes::record_change(conn, &after.id, Some(&new.id), ChangeType::Create, sync_snapshot(after), now)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Applies a status change, rolling recurring tasks forward on completion.
fn apply_status(task: &mut Task, status: TaskStatus, now: DateTime<Utc>) -> Result<(), AppError> {
    if status == task.status {
        return Ok(());
    }

    if status == TaskStatus::Completed {
        if let Some(next) = next_occurrence(task, now)? {
            let reference = task.due_date.unwrap_or(now);
            let shift = next - reference;
            task.due_date = Some(next);
            task.start_date = task.start_date.map(|s| s + shift);
            task.last_completed_date = Some(now);
            task.postponed_until = None;
            task.completed_at = None;
            task.status = TaskStatus::Todo;
            task.clear_schedule();
            return Ok(());
        }
        task.completed_at = Some(now);
        if task.is_recurring {
            task.last_completed_date = Some(now);
        }
    } else {
        task.completed_at = None;
    }

    task.status = status;
    if !status.is_open() {
        task.clear_schedule();
    }
    Ok(())
}

fn next_occurrence(task: &Task, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, AppError> {
    if !task.is_recurring {
        return Ok(None);
    }
    let Some(raw) = task.recurrence_rule.as_deref() else {
        return Ok(None);
    };
    let rule: RecurrenceRule = raw.parse()?;
    Ok(rule.next_after(task.due_date.unwrap_or(now)))
}

fn validate_fields(task: &Task) -> Result<(), AppError> {
    if let Some(duration) = task.duration {
        if !(1..=MAX_DURATION_MINUTES).contains(&duration) {
            return Err(AppError::BadRequest(format!(
                "duration must be between 1 and {} minutes",
                MAX_DURATION_MINUTES
            )));
        }
    }
    if let Some(rule) = task.recurrence_rule.as_deref() {
        recurrence::validate(rule)?;
    }
    if task.is_recurring && task.recurrence_rule.is_none() {
        return Err(AppError::BadRequest("recurring tasks need a recurrence_rule".to_string()));
    }
    if let (Some(start), Some(due)) = (task.start_date, task.due_date) {
        if start > due {
            return Err(AppError::BadRequest("start_date must not be after due_date".to_string()));
        }
    }
    Ok(())
}

fn require_title(raw: &str) -> Result<String, AppError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    Ok(title.to_string())
}

async fn ensure_project_exists(conn: &mut SqliteConnection, project_id: Option<&str>) -> Result<(), AppError> {
    let Some(project_id) = project_id else {
        return Ok(());
    };
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_one(&mut *conn)
        .await?;
    if count == 0 {
        return Err(AppError::BadRequest(format!("project {} does not exist", project_id)));
    }
    Ok(())
}

async fn ensure_tags_exist(conn: &mut SqliteConnection, tag_ids: &[String]) -> Result<(), AppError> {
    for tag_id in tag_ids {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE id = ?")
            .bind(tag_id)
            .fetch_one(&mut *conn)
            .await?;
        if count == 0 {
            return Err(AppError::BadRequest(format!("tag {} does not exist", tag_id)));
        }
    }
    Ok(())
}

async fn replace_tags(conn: &mut SqliteConnection, task_id: &str, tag_ids: &[String]) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM task_tags WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;
    for tag_id in tag_ids {
        sqlx::query("INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?, ?)")
            .bind(task_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn attach_tags(db: &SqlitePool, tasks: &mut [Task]) -> Result<(), sqlx::Error> {
    if tasks.is_empty() {
        return Ok(());
    }
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT tt.task_id, t.id, t.name, t.color FROM task_tags tt JOIN tags t ON t.id = tt.tag_id WHERE tt.task_id IN (",
    );
    let mut separated = builder.separated(", ");
    for task in tasks.iter() {
        separated.push_bind(task.id.clone());
    }
    separated.push_unseparated(") ORDER BY t.name");

    let rows: Vec<(String, String, String, Option<String>)> =
        builder.build_query_as().fetch_all(db).await?;

    let mut by_task: HashMap<String, Vec<Tag>> = HashMap::new();
    for (task_id, id, name, color) in rows {
        by_task.entry(task_id).or_default().push(Tag { id, name, color });
    }
    for task in tasks.iter_mut() {
        task.tags = by_task.remove(&task.id).unwrap_or_default();
    }
    Ok(())
}

async fn insert_row(conn: &mut SqliteConnection, task: &Task) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status)
    .bind(task.due_date)
    .bind(task.start_date)
    .bind(task.duration)
    .bind(task.priority)
    .bind(task.energy_level)
    .bind(task.preferred_time)
    .bind(&task.project_id)
    .bind(task.is_recurring)
    .bind(&task.recurrence_rule)
    .bind(task.last_completed_date)
    .bind(task.completed_at)
    .bind(task.is_auto_scheduled)
    .bind(task.schedule_locked)
    .bind(task.scheduled_start)
    .bind(task.scheduled_end)
    .bind(task.schedule_score)
    .bind(task.last_scheduled)
    .bind(task.postponed_until)
    .bind(&task.external_task_id)
    .bind(task.source)
    .bind(&task.external_list_id)
    .bind(task.last_synced_at)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_row(conn: &mut SqliteConnection, task: &Task) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE tasks
        SET title = ?, description = ?, status = ?, due_date = ?, start_date = ?, duration = ?,
            priority = ?, energy_level = ?, preferred_time = ?, project_id = ?, is_recurring = ?,
            recurrence_rule = ?, last_completed_date = ?, completed_at = ?, is_auto_scheduled = ?,
            schedule_locked = ?, scheduled_start = ?, scheduled_end = ?, schedule_score = ?,
            last_scheduled = ?, postponed_until = ?, external_task_id = ?, source = ?,
            external_list_id = ?, last_synced_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status)
    .bind(task.due_date)
    .bind(task.start_date)
    .bind(task.duration)
    .bind(task.priority)
    .bind(task.energy_level)
    .bind(task.preferred_time)
    .bind(&task.project_id)
    .bind(task.is_recurring)
    .bind(&task.recurrence_rule)
    .bind(task.last_completed_date)
    .bind(task.completed_at)
    .bind(task.is_auto_scheduled)
    .bind(task.schedule_locked)
    .bind(task.scheduled_start)
    .bind(task.scheduled_end)
    .bind(task.schedule_score)
    .bind(task.last_scheduled)
    .bind(task.postponed_until)
    .bind(&task.external_task_id)
    .bind(task.source)
    .bind(&task.external_list_id)
    .bind(task.last_synced_at)
    .bind(task.updated_at)
    .bind(&task.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::{connect_in_memory, projects, tags};
    use crate::models::{
        NewMappingRequest, NewProjectRequest, NewTagRequest, Priority, SyncDirection,
    };
    use crate::scheduling::TimeSlot;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn new_task(title: &str) -> NewTaskRequest {
        NewTaskRequest {
            title: title.to_string(),
            ..Default::default()
        }
    }

    async fn project(pool: &SqlitePool, name: &str) -> String {
        projects::insert_project(
            pool,
            NewProjectRequest {
                name: name.to_string(),
                description: None,
                color: None,
                status: None,
            },
            at(1, 0),
        )
        .await
        .expect("Failed to insert project")
        .id
    }

    async fn mapped_project(pool: &SqlitePool, name: &str) -> (String, String) {
        let project_id = project(pool, name).await;
        let mapping = mappings::insert_mapping(
            pool,
            NewMappingRequest {
                provider: TaskSource::Notion,
                external_list_id: format!("db-{name}"),
                project_id: project_id.clone(),
                direction: SyncDirection::Bidirectional,
                is_auto_scheduled: false,
            },
            at(1, 0),
        )
        .await
        .expect("Failed to insert mapping");
        (project_id, mapping.id)
    }

    #[tokio::test]
    async fn test_insert_and_fetch_task_with_tags() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let tag = tags::insert_tag(
            &pool,
            NewTagRequest {
                name: "focus".to_string(),
                color: None,
            },
        )
        .await
        .unwrap();

        let mut req = new_task("  Write report ");
        req.tag_ids = vec![tag.id.clone()];
        req.priority = Some(Priority::High);
        let task = insert_task(&pool, req, at(2, 8)).await.expect("Failed to insert task");

        assert_eq!(task.title, "Write report");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.source, TaskSource::Local);
        assert_eq!(task.tags, vec![tag.clone()]);

        insert_task(&pool, new_task("Buy milk"), at(2, 9)).await.unwrap();

        let by_tag = fetch_tasks(
            &pool,
            &TaskFilter {
                tag_id: Some(tag.id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].tags.len(), 1);

        let by_query = fetch_tasks(
            &pool,
            &TaskFilter {
                q: Some("milk".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_query.len(), 1);
        assert_eq!(by_query[0].title, "Buy milk");
        assert!(by_query[0].tags.is_empty());
    }

    #[tokio::test]
    async fn test_status_filter_rejects_unknown_status() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let result = fetch_tasks(
            &pool,
            &TaskFilter {
                status: Some("TODO,DONE".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_invalid_tasks_are_rejected() {
        let pool = connect_in_memory().await.expect("Failed to create test db");

        let blank = insert_task(&pool, new_task(" "), at(2, 8)).await;
        assert!(matches!(blank, Err(AppError::BadRequest(_))));

        let mut orphan = new_task("orphan");
        orphan.project_id = Some("missing".to_string());
        assert!(matches!(insert_task(&pool, orphan, at(2, 8)).await, Err(AppError::BadRequest(_))));

        let mut zero = new_task("zero");
        zero.duration = Some(0);
        assert!(matches!(insert_task(&pool, zero, at(2, 8)).await, Err(AppError::BadRequest(_))));

        let mut bad_rule = new_task("bad rule");
        bad_rule.is_recurring = true;
        bad_rule.recurrence_rule = Some("FREQ=SOMETIMES".to_string());
        assert!(matches!(insert_task(&pool, bad_rule, at(2, 8)).await, Err(AppError::BadRequest(_))));

        let mut huge_interval = new_task("huge interval");
        huge_interval.is_recurring = true;
        huge_interval.recurrence_rule = Some("FREQ=DAILY;INTERVAL=1000000000".to_string());
        assert!(matches!(insert_task(&pool, huge_interval, at(2, 8)).await, Err(AppError::BadRequest(_))));

        let mut no_rule = new_task("no rule");
        no_rule.is_recurring = true;
        assert!(matches!(insert_task(&pool, no_rule, at(2, 8)).await, Err(AppError::BadRequest(_))));

        assert!(fetch_tasks(&pool, &TaskFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_task_clears_nullable_fields_and_tracks_completion() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let mut req = new_task("Plan sprint");
        req.due_date = Some(at(5, 17));
        let task = insert_task(&pool, req, at(2, 8)).await.unwrap();

        let update: UpdateTaskRequest =
            serde_json::from_str(r#"{"due_date": null, "status": "COMPLETED"}"#).unwrap();
        let updated = update_task(&pool, &task.id, update, at(3, 8))
            .await
            .expect("Failed to update task")
            .expect("Task not found");
        assert_eq!(updated.due_date, None);
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.completed_at, Some(at(3, 8)));
        assert_eq!(updated.updated_at, at(3, 8));

        let reopen = UpdateTaskRequest {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        let reopened = update_task(&pool, &task.id, reopen, at(3, 9)).await.unwrap().unwrap();
        assert_eq!(reopened.completed_at, None);

        let missing = update_task(&pool, "nope", UpdateTaskRequest::default(), at(3, 9)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_completing_recurring_task_rolls_forward() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let mut req = new_task("Weekly review");
        req.is_recurring = true;
        req.recurrence_rule = Some("FREQ=WEEKLY".to_string());
        req.due_date = Some(at(6, 16));
        req.start_date = Some(at(6, 9));
        let task = insert_task(&pool, req, at(2, 8)).await.unwrap();

        let done = complete_task(&pool, &task.id, at(6, 17)).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Todo);
        assert_eq!(done.completed_at, None);
        assert_eq!(done.last_completed_date, Some(at(6, 17)));
        assert_eq!(done.due_date, Some(at(13, 16)));
        assert_eq!(done.start_date, Some(at(13, 9)));
    }

    #[tokio::test]
    async fn test_completing_plain_task_clears_schedule() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let mut req = new_task("Call plumber");
        req.is_auto_scheduled = true;
        let task = insert_task(&pool, req, at(2, 8)).await.unwrap();
        let placement = Placement {
            task_id: task.id.clone(),
            slot: Some(TimeSlot::new(at(2, 9), at(2, 10))),
            score: Some(0.8),
        };
        save_schedule(&pool, &[placement], at(2, 8)).await.unwrap();

        let done = complete_task(&pool, &task.id, at(2, 11)).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.scheduled_start, None);
        assert_eq!(done.schedule_score, None);
    }

    #[tokio::test]
    async fn test_lock_and_postpone() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let task = insert_task(&pool, new_task("Dentist"), at(2, 8)).await.unwrap();

        let unscheduled = set_schedule_lock(&pool, &task.id, true, at(2, 8)).await;
        assert!(matches!(unscheduled, Err(AppError::BadRequest(_))));

        let placement = Placement {
            task_id: task.id.clone(),
            slot: Some(TimeSlot::new(at(2, 9), at(2, 10))),
            score: Some(0.5),
        };
        save_schedule(&pool, &[placement], at(2, 8)).await.unwrap();

        let locked = set_schedule_lock(&pool, &task.id, true, at(2, 8)).await.unwrap().unwrap();
        assert!(locked.schedule_locked);
        let blocked = postpone_task(&pool, &task.id, at(4, 9), at(2, 8)).await;
        assert!(matches!(blocked, Err(AppError::Conflict(_))));

        set_schedule_lock(&pool, &task.id, false, at(2, 8)).await.unwrap();
        let past = postpone_task(&pool, &task.id, at(1, 9), at(2, 8)).await;
        assert!(matches!(past, Err(AppError::BadRequest(_))));

        let postponed = postpone_task(&pool, &task.id, at(4, 9), at(2, 8)).await.unwrap().unwrap();
        assert_eq!(postponed.postponed_until, Some(at(4, 9)));
        assert_eq!(postponed.scheduled_start, None);
    }

    #[tokio::test]
    async fn test_changes_recorded_only_for_mapped_projects() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let plain = project(&pool, "plain").await;
        let (synced, mapping_id) = mapped_project(&pool, "synced").await;

        let mut local = new_task("local only");
        local.project_id = Some(plain);
        let local = insert_task(&pool, local, at(2, 8)).await.unwrap();
        assert!(changes::fetch_changes_for_task(&pool, &local.id).await.unwrap().is_empty());

        let mut remote = new_task("shared");
        remote.project_id = Some(synced);
        let task = insert_task(&pool, remote, at(2, 8)).await.unwrap();

        // Duration is not a synced field.
        let update = UpdateTaskRequest {
            duration: Some(Some(45)),
            ..Default::default()
        };
        update_task(&pool, &task.id, update, at(2, 9)).await.unwrap();

        let update = UpdateTaskRequest {
            title: Some("shared, renamed".to_string()),
            due_date: Some(Some(at(2, 9) + Duration::days(1))),
            ..Default::default()
        };
        update_task(&pool, &task.id, update, at(2, 10)).await.unwrap();
        delete_task(&pool, &task.id, at(2, 11)).await.unwrap();

        let log = changes::fetch_changes_for_task(&pool, &task.id).await.unwrap();
        let kinds: Vec<_> = log.iter().map(|c| c.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Create, ChangeType::Update, ChangeType::Delete]);
        assert!(log.iter().all(|c| c.mapping_id.as_deref() == Some(mapping_id.as_str())));

        let diff = log[1].change_data.0.as_object().unwrap();
        assert_eq!(diff.len(), 2);
        assert_eq!(diff["title"], "shared, renamed");
        assert!(diff.contains_key("due_date"));

        let pending = changes::fetch_pending_changes(&pool, &mapping_id).await.unwrap();
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_moving_out_of_mapped_project_detaches_external_task() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let (synced, mapping_id) = mapped_project(&pool, "synced").await;

        let mut req = new_task("linked");
        req.project_id = Some(synced);
        let task = insert_task(&pool, req, at(2, 8)).await.unwrap();
        mark_task_synced(&pool, &task.id, "ext-1", "db-synced", TaskSource::Notion, at(2, 8))
            .await
            .unwrap();

        let update = UpdateTaskRequest {
            project_id: Some(None),
            ..Default::default()
        };
        let moved = update_task(&pool, &task.id, update, at(2, 9)).await.unwrap().unwrap();
        assert_eq!(moved.external_task_id, None);
        assert_eq!(moved.source, TaskSource::Local);

        let pending = changes::fetch_pending_changes(&pool, &mapping_id).await.unwrap();
        let last = pending.last().expect("expected a delete change");
        assert_eq!(last.change_type, ChangeType::Delete);
        assert_eq!(last.change_data.0["external_task_id"], "ext-1");
    }

    #[tokio::test]
    async fn test_remote_update_keeps_local_completion_time() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let done = insert_task(&pool, new_task("done here"), at(2, 8)).await.unwrap();
        let update = UpdateTaskRequest {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        let done = update_task(&pool, &done.id, update, at(3, 8)).await.unwrap().unwrap();
        let open = insert_task(&pool, new_task("done remotely"), at(2, 8)).await.unwrap();

        let echo = |task: &Task| ExternalTask {
            external_id: "page-1".to_string(),
            title: task.title.clone(),
            description: None,
            status: TaskStatus::Completed,
            due_date: None,
            priority: None,
            completed_at: Some(at(4, 10)),
            updated_at: at(4, 10),
        };

        let kept = apply_remote_update(&pool, &done, &echo(&done), at(4, 11)).await.unwrap();
        assert_eq!(kept.completed_at, Some(at(3, 8)));
        let pulled = apply_remote_update(&pool, &open, &echo(&open), at(4, 11)).await.unwrap();
        assert_eq!(pulled.completed_at, Some(at(4, 10)));
        assert_eq!(find_task(&pool, &done.id).await.unwrap().unwrap().completed_at, Some(at(3, 8)));
    }
}
