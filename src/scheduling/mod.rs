//! Auto-scheduling: finds free working time for auto-scheduled tasks and
//! picks the best slot for each by weighted scoring.

pub mod engine;
pub mod scorer;
pub mod slots;

pub use engine::{Placement, is_candidate, plan};
pub use scorer::{ScoreFactors, SlotScorer};
pub use slots::{BusyInterval, SlotFinder, TimeSlot};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use crate::models::{Task, TaskSource, TaskStatus};

    pub fn task(id: &str) -> Task {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: None,
            status: TaskStatus::Todo,
            due_date: None,
            start_date: None,
            duration: None,
            priority: None,
            energy_level: None,
            preferred_time: None,
            project_id: None,
            tags: Vec::new(),
            is_recurring: false,
            recurrence_rule: None,
            last_completed_date: None,
            completed_at: None,
            is_auto_scheduled: false,
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
            created_at: created,
            updated_at: created,
        }
    }
}
