use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

use super::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Open tasks are the only ones the scheduler places on the calendar.
    pub fn is_open(self) -> bool {
        matches!(self, TaskStatus::Todo | TaskStatus::InProgress)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TODO" => Some(TaskStatus::Todo),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "COMPLETED" => Some(TaskStatus::Completed),
            "CANCELLED" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
    None,
}

impl Priority {
    /// Sort rank, lower runs first.
    pub fn rank(priority: Option<Priority>) -> u8 {
        match priority {
            Some(Priority::High) => 0,
            Some(Priority::Medium) => 1,
            Some(Priority::Low) => 2,
            Some(Priority::None) | None => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergyLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimePreference {
    Morning,
    Afternoon,
    Evening,
}

impl TimePreference {
    /// Local hour range `[start, end)` the preference covers.
    pub fn hours(self) -> (u32, u32) {
        match self {
            TimePreference::Morning => (5, 12),
            TimePreference::Afternoon => (12, 17),
            TimePreference::Evening => (17, 22),
        }
    }
}

/// Where a task lives besides the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskSource {
    #[default]
    Local,
    Notion,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    pub priority: Option<Priority>,
    pub energy_level: Option<EnergyLevel>,
    pub preferred_time: Option<TimePreference>,
    pub project_id: Option<String>,
    #[sqlx(skip)]
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    pub last_completed_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_auto_scheduled: bool,
    pub schedule_locked: bool,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub schedule_score: Option<f64>,
    pub last_scheduled: Option<DateTime<Utc>>,
    pub postponed_until: Option<DateTime<Utc>>,
    pub external_task_id: Option<String>,
    pub source: TaskSource,
    pub external_list_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn clear_schedule(&mut self) {
        self.scheduled_start = None;
        self.scheduled_end = None;
        self.schedule_score = None;
        self.schedule_locked = false;
    }

    pub fn tag_ids(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    pub priority: Option<Priority>,
    pub energy_level: Option<EnergyLevel>,
    pub preferred_time: Option<TimePreference>,
    pub project_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    #[serde(default)]
    pub is_auto_scheduled: bool,
}

/// Partial update. Nullable fields distinguish "absent" (outer `None`)
/// from an explicit `null` (`Some(None)`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub duration: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub priority: Option<Option<Priority>>,
    #[serde(default, deserialize_with = "double_option")]
    pub energy_level: Option<Option<EnergyLevel>>,
    #[serde(default, deserialize_with = "double_option")]
    pub preferred_time: Option<Option<TimePreference>>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<String>>,
    pub tag_ids: Option<Vec<String>>,
    pub is_recurring: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub recurrence_rule: Option<Option<String>>,
    pub is_auto_scheduled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    /// Comma separated statuses.
    pub status: Option<String>,
    pub project_id: Option<String>,
    pub tag_id: Option<String>,
    pub q: Option<String>,
    pub auto_scheduled: Option<bool>,
}

/// Remote representation of a task as an external provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTask {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
