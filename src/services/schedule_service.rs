use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{events, settings, tasks};
use crate::error::AppError;
use crate::models::EventRange;
use crate::scheduling;

pub struct ScheduleService {
    db: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleResult {
    pub run_at: DateTime<Utc>,
    pub scheduled: Vec<ScheduledTask>,
    pub unscheduled: Vec<String>,
}

impl ScheduleService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Replans every auto-scheduled task and stores the result.
    pub async fn schedule_all(&self, now: DateTime<Utc>) -> Result<ScheduleResult, AppError> {
        let settings = settings::load_settings(&self.db).await?;
        let all_tasks = tasks::fetch_all_tasks(&self.db).await?;

        // One extra day on both ends covers any local offset.
        let range = EventRange {
            from: Some(now - Duration::days(1)),
            to: Some(now + Duration::days(i64::from(settings.horizon_days) + 1)),
        };
        let busy_events = events::fetch_events(&self.db, &range).await?;

        let placements = scheduling::plan(&all_tasks, &busy_events, &settings, now);
        tasks::save_schedule(&self.db, &placements, now).await?;

        let mut result = ScheduleResult {
            run_at: now,
            scheduled: Vec::new(),
            unscheduled: Vec::new(),
        };
        for placement in placements {
            match (placement.slot, placement.score) {
                (Some(slot), Some(score)) => result.scheduled.push(ScheduledTask {
                    task_id: placement.task_id,
                    start: slot.start,
                    end: slot.end,
                    score,
                }),
                _ => result.unscheduled.push(placement.task_id),
            }
        }

        info!(
            "Auto-schedule completed - scheduled: {}, unscheduled: {}",
            result.scheduled.len(),
            result.unscheduled.len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::connect_in_memory;
    use crate::models::{NewEventRequest, NewTaskRequest, Priority};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_all_persists_placements() {
        let db = connect_in_memory().await.expect("Failed to open database");
        // 2026-03-02 is a Monday.
        let now = at(2, 8, 0);

        let task = tasks::insert_task(
            &db,
            NewTaskRequest {
                title: "Write report".to_string(),
                duration: Some(60),
                priority: Some(Priority::High),
                is_auto_scheduled: true,
                ..Default::default()
            },
            at(1, 12, 0),
        )
        .await
        .expect("Failed to insert task");
        let too_long = tasks::insert_task(
            &db,
            NewTaskRequest {
                title: "Marathon".to_string(),
                duration: Some(20 * 60),
                is_auto_scheduled: true,
                ..Default::default()
            },
            at(1, 12, 0),
        )
        .await
        .expect("Failed to insert task");
        events::insert_event(
            &db,
            NewEventRequest {
                title: "Standup".to_string(),
                starts_at: at(2, 9, 0),
                ends_at: at(2, 9, 30),
                is_all_day: false,
            },
            now,
        )
        .await
        .expect("Failed to insert event");

        let result = ScheduleService::new(db.clone())
            .schedule_all(now)
            .await
            .expect("Failed to schedule");

        assert_eq!(result.run_at, now);
        assert_eq!(result.unscheduled, vec![too_long.id.clone()]);
        assert_eq!(result.scheduled.len(), 1);
        let placed = &result.scheduled[0];
        assert_eq!(placed.task_id, task.id);
        // Standup plus the default 15 minute buffer.
        assert!(placed.start >= at(2, 9, 45));

        let stored = tasks::find_task(&db, &task.id).await.unwrap().unwrap();
        assert_eq!(stored.scheduled_start, Some(placed.start));
        assert_eq!(stored.scheduled_end, Some(placed.end));
        assert_eq!(stored.last_scheduled, Some(now));
        assert_eq!(stored.updated_at, task.updated_at);

        let unplaced = tasks::find_task(&db, &too_long.id).await.unwrap().unwrap();
        assert_eq!(unplaced.scheduled_start, None);
        assert_eq!(unplaced.last_scheduled, Some(now));
    }
}
