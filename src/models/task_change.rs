use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

/// One entry of the outgoing sync queue. `change_data` holds a task
/// snapshot for CREATE, the changed fields for UPDATE and the external
/// reference for DELETE.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskChange {
    pub id: String,
    pub task_id: String,
    pub mapping_id: Option<String>,
    pub change_type: ChangeType,
    pub change_data: Json<serde_json::Value>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}
