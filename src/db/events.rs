use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CalendarEvent, EventRange, NewEventRequest};

/// Events overlapping the range; open ends are unbounded.
pub async fn fetch_events(db: &SqlitePool, range: &EventRange) -> Result<Vec<CalendarEvent>, sqlx::Error> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, title, starts_at, ends_at, is_all_day, created_at FROM calendar_events WHERE 1 = 1",
    );
    if let Some(from) = range.from {
        builder.push(" AND ends_at > ").push_bind(from);
    }
    if let Some(to) = range.to {
        builder.push(" AND starts_at < ").push_bind(to);
    }
    builder.push(" ORDER BY starts_at");

    builder.build_query_as::<CalendarEvent>().fetch_all(db).await
}

pub async fn insert_event(
    db: &SqlitePool,
    req: NewEventRequest,
    now: DateTime<Utc>,
) -> Result<CalendarEvent, AppError> {
    if req.ends_at <= req.starts_at {
        return Err(AppError::BadRequest("event must end after it starts".to_string()));
    }

    let event = CalendarEvent {
        id: Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        is_all_day: req.is_all_day,
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO calendar_events (id, title, starts_at, ends_at, is_all_day, created_at) VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(&event.id)
    .bind(&event.title)
    .bind(event.starts_at)
    .bind(event.ends_at)
    .bind(event.is_all_day)
    .bind(event.created_at)
    .execute(db)
    .await?;

    Ok(event)
}

pub async fn delete_event(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM calendar_events WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}
