//! External task providers the sync engine talks to.

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{ExternalTask, Task, TaskSource};

#[async_trait]
pub trait TaskProvider: Send + Sync {
    fn source(&self) -> TaskSource;

    /// `false` for the placeholder used when no external service is set up.
    /// Sync leaves every mapping untouched in that case.
    fn is_configured(&self) -> bool {
        true
    }

    /// Every live task of the external list.
    async fn fetch_tasks(&self, list_id: &str) -> Result<Vec<ExternalTask>, AppError>;

    /// Creates the task remotely and returns its external id.
    async fn create_task(&self, list_id: &str, task: &Task) -> Result<String, AppError>;

    async fn update_task(&self, list_id: &str, external_id: &str, task: &Task) -> Result<(), AppError>;

    /// Removing a task that is already gone is not an error.
    async fn delete_task(&self, list_id: &str, external_id: &str) -> Result<(), AppError>;
}

/// Provider used when no external service is configured.
pub struct NoopTaskProvider;

#[async_trait]
impl TaskProvider for NoopTaskProvider {
    fn source(&self) -> TaskSource {
        TaskSource::Notion
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn fetch_tasks(&self, _list_id: &str) -> Result<Vec<ExternalTask>, AppError> {
        Ok(Vec::new())
    }

    /// Nothing can be linked without a real provider.
    async fn create_task(&self, _list_id: &str, _task: &Task) -> Result<String, AppError> {
        Err(AppError::Provider("no task provider configured".to_string()))
    }

    async fn update_task(&self, _list_id: &str, _external_id: &str, _task: &Task) -> Result<(), AppError> {
        Ok(())
    }

    async fn delete_task(&self, _list_id: &str, _external_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}
