use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::db::tasks;
use crate::error::AppError;
use crate::models::{NewMappingRequest, TaskListMapping, TaskSource};

const MAPPING_COLUMNS: &str = "id, provider, external_list_id, project_id, direction, is_auto_scheduled, last_synced_at, created_at";

pub async fn fetch_mappings(db: &SqlitePool) -> Result<Vec<TaskListMapping>, sqlx::Error> {
    sqlx::query_as::<_, TaskListMapping>(&format!(
        "SELECT {MAPPING_COLUMNS} FROM task_list_mappings ORDER BY created_at"
    ))
    .fetch_all(db)
    .await
}

pub async fn find_mapping(db: &SqlitePool, id: &str) -> Result<Option<TaskListMapping>, sqlx::Error> {
    sqlx::query_as::<_, TaskListMapping>(&format!(
        "SELECT {MAPPING_COLUMNS} FROM task_list_mappings WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

/// Mapping of a project, looked up inside an open transaction.
pub async fn find_mapping_for_project(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Option<TaskListMapping>, sqlx::Error> {
    sqlx::query_as::<_, TaskListMapping>(&format!(
        "SELECT {MAPPING_COLUMNS} FROM task_list_mappings WHERE project_id = ?"
    ))
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn insert_mapping(
    db: &SqlitePool,
    req: NewMappingRequest,
    now: DateTime<Utc>,
) -> Result<TaskListMapping, AppError> {
    if req.provider == TaskSource::Local {
        return Err(AppError::BadRequest("a mapping needs an external provider".to_string()));
    }
    let external_list_id = req.external_list_id.trim().to_string();
    if external_list_id.is_empty() {
        return Err(AppError::BadRequest("external_list_id must not be empty".to_string()));
    }

    let project_exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE id = ?")
        .bind(&req.project_id)
        .fetch_one(db)
        .await?;
    if project_exists == 0 {
        return Err(AppError::BadRequest(format!("project {} does not exist", req.project_id)));
    }

    let mapping = TaskListMapping {
        id: Uuid::new_v4().to_string(),
        provider: req.provider,
        external_list_id,
        project_id: req.project_id,
        direction: req.direction,
        is_auto_scheduled: req.is_auto_scheduled,
        last_synced_at: None,
        created_at: now,
    };

    let mut tx = db.begin().await?;
    sqlx::query(
        "INSERT INTO task_list_mappings (id, provider, external_list_id, project_id, direction, is_auto_scheduled, last_synced_at, created_at) VALUES (?, ?, ?, ?, ?, ?, NULL, ?)"
    )
    .bind(&mapping.id)
    .bind(mapping.provider)
    .bind(&mapping.external_list_id)
    .bind(&mapping.project_id)
    .bind(mapping.direction)
    .bind(mapping.is_auto_scheduled)
    .bind(mapping.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict("project is already mapped".to_string())
        }
        _ => AppError::Database(e),
    })?;

    let queued = tasks::queue_project_tasks(&mut tx, &mapping.project_id, &mapping.id, now).await?;
    tx.commit().await?;

    debug!("mapped project {} to list {} ({} tasks queued)", mapping.project_id, mapping.external_list_id, queued);
    Ok(mapping)
}

pub async fn delete_mapping(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM task_list_mappings WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn touch_mapping(db: &SqlitePool, id: &str, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE task_list_mappings SET last_synced_at = ? WHERE id = ?")
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
