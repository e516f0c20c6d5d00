use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewTagRequest, Tag, UpdateTagRequest};

pub async fn fetch_tags(db: &SqlitePool) -> Result<Vec<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>("SELECT id, name, color FROM tags ORDER BY name")
        .fetch_all(db)
        .await
}

pub async fn find_tag(db: &SqlitePool, id: &str) -> Result<Option<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>("SELECT id, name, color FROM tags WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn insert_tag(db: &SqlitePool, req: NewTagRequest) -> Result<Tag, AppError> {
    let tag = Tag {
        id: Uuid::new_v4().to_string(),
        name: require_name(&req.name)?,
        color: req.color,
    };

    sqlx::query("INSERT INTO tags (id, name, color) VALUES (?, ?, ?)")
        .bind(&tag.id)
        .bind(&tag.name)
        .bind(&tag.color)
        .execute(db)
        .await
        .map_err(|e| unique_violation(e, &tag.name))?;

    Ok(tag)
}

pub async fn update_tag(
    db: &SqlitePool,
    id: &str,
    req: UpdateTagRequest,
) -> Result<Option<Tag>, AppError> {
    let Some(mut tag) = find_tag(db, id).await? else {
        return Ok(None);
    };
    if let Some(name) = req.name {
        tag.name = require_name(&name)?;
    }
    if let Some(color) = req.color {
        tag.color = Some(color);
    }

    sqlx::query("UPDATE tags SET name = ?, color = ? WHERE id = ?")
        .bind(&tag.name)
        .bind(&tag.color)
        .bind(id)
        .execute(db)
        .await
        .map_err(|e| unique_violation(e, &tag.name))?;

    Ok(Some(tag))
}

pub async fn delete_tag(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM tags WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

fn require_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("tag name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn unique_violation(err: sqlx::Error, name: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(format!("tag '{}' already exists", name))
        }
        _ => AppError::Database(err),
    }
}
