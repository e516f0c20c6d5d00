use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::AutoScheduleSettings;

/// Stored settings, or the defaults when none were saved yet.
pub async fn load_settings(db: &SqlitePool) -> Result<AutoScheduleSettings, sqlx::Error> {
    let stored = sqlx::query_as::<_, AutoScheduleSettings>(
        r#"
        SELECT work_days, work_hour_start, work_hour_end, buffer_minutes,
               high_energy_start, high_energy_end, medium_energy_start, medium_energy_end,
               low_energy_start, low_energy_end, group_by_project, utc_offset_minutes,
               horizon_days, updated_at
        FROM auto_schedule_settings
        WHERE id = 1
        "#,
    )
    .fetch_optional(db)
    .await?;

    Ok(stored.unwrap_or_default())
}

pub async fn save_settings(
    db: &SqlitePool,
    mut settings: AutoScheduleSettings,
    now: DateTime<Utc>,
) -> Result<AutoScheduleSettings, AppError> {
    settings.validate().map_err(AppError::BadRequest)?;
    settings.work_days.sort_unstable();
    settings.work_days.dedup();
    settings.updated_at = now;

    sqlx::query(
        r#"
        INSERT INTO auto_schedule_settings
            (id, work_days, work_hour_start, work_hour_end, buffer_minutes,
             high_energy_start, high_energy_end, medium_energy_start, medium_energy_end,
             low_energy_start, low_energy_end, group_by_project, utc_offset_minutes,
             horizon_days, updated_at)
        VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            work_days = excluded.work_days,
            work_hour_start = excluded.work_hour_start,
            work_hour_end = excluded.work_hour_end,
            buffer_minutes = excluded.buffer_minutes,
            high_energy_start = excluded.high_energy_start,
            high_energy_end = excluded.high_energy_end,
            medium_energy_start = excluded.medium_energy_start,
            medium_energy_end = excluded.medium_energy_end,
            low_energy_start = excluded.low_energy_start,
            low_energy_end = excluded.low_energy_end,
            group_by_project = excluded.group_by_project,
            utc_offset_minutes = excluded.utc_offset_minutes,
            horizon_days = excluded.horizon_days,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&settings.work_days)
    .bind(settings.work_hour_start)
    .bind(settings.work_hour_end)
    .bind(settings.buffer_minutes)
    .bind(settings.high_energy_start)
    .bind(settings.high_energy_end)
    .bind(settings.medium_energy_start)
    .bind(settings.medium_energy_end)
    .bind(settings.low_energy_start)
    .bind(settings.low_energy_end)
    .bind(settings.group_by_project)
    .bind(settings.utc_offset_minutes)
    .bind(settings.horizon_days)
    .bind(settings.updated_at)
    .execute(db)
    .await?;

    Ok(settings)
}
