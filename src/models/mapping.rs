use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::TaskSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncDirection {
    #[default]
    Bidirectional,
    Incoming,
    Outgoing,
}

impl SyncDirection {
    pub fn pushes(self) -> bool {
        matches!(self, SyncDirection::Bidirectional | SyncDirection::Outgoing)
    }

    pub fn pulls(self) -> bool {
        matches!(self, SyncDirection::Bidirectional | SyncDirection::Incoming)
    }
}

/// Links a local project to a task list of an external provider.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskListMapping {
    pub id: String,
    pub provider: TaskSource,
    pub external_list_id: String,
    pub project_id: String,
    pub direction: SyncDirection,
    pub is_auto_scheduled: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMappingRequest {
    pub provider: TaskSource,
    pub external_list_id: String,
    pub project_id: String,
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default)]
    pub is_auto_scheduled: bool,
}
