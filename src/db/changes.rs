use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::models::{ChangeType, TaskChange};

const CHANGE_COLUMNS: &str =
    "id, task_id, mapping_id, change_type, change_data, synced, created_at";

pub async fn record_change(
    conn: &mut SqliteConnection,
    task_id: &str,
    mapping_id: Option<&str>,
    change_type: ChangeType,
    change_data: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<TaskChange, sqlx::Error> {
    let change = TaskChange {
        id: Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        mapping_id: mapping_id.map(str::to_string),
        change_type,
        change_data: Json(change_data),
        synced: false,
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO task_changes (id, task_id, mapping_id, change_type, change_data, synced, created_at) VALUES (?, ?, ?, ?, ?, 0, ?)"
    )
    .bind(&change.id)
    .bind(&change.task_id)
    .bind(&change.mapping_id)
    .bind(change.change_type)
    .bind(&change.change_data)
    .bind(change.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(change)
}

/// Unsynced changes of a mapping, oldest first.
pub async fn fetch_pending_changes(
    db: &SqlitePool,
    mapping_id: &str,
) -> Result<Vec<TaskChange>, sqlx::Error> {
    sqlx::query_as::<_, TaskChange>(&format!(
        "SELECT {CHANGE_COLUMNS} FROM task_changes WHERE mapping_id = ? AND synced = 0 ORDER BY created_at, rowid"
    ))
    .bind(mapping_id)
    .fetch_all(db)
    .await
}

pub async fn fetch_all_pending_changes(db: &SqlitePool) -> Result<Vec<TaskChange>, sqlx::Error> {
    sqlx::query_as::<_, TaskChange>(&format!(
        "SELECT {CHANGE_COLUMNS} FROM task_changes WHERE synced = 0 ORDER BY created_at, rowid"
    ))
    .fetch_all(db)
    .await
}

pub async fn fetch_changes_for_task(
    db: &SqlitePool,
    task_id: &str,
) -> Result<Vec<TaskChange>, sqlx::Error> {
    sqlx::query_as::<_, TaskChange>(&format!(
        "SELECT {CHANGE_COLUMNS} FROM task_changes WHERE task_id = ? ORDER BY created_at, rowid"
    ))
    .bind(task_id)
    .fetch_all(db)
    .await
}

pub async fn mark_changes_synced(db: &SqlitePool, ids: &[String]) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE task_changes SET synced = 1 WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let result = builder.build().execute(db).await?;
    Ok(result.rows_affected())
}
