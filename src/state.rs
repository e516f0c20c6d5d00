use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::sync::TaskProvider;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub provider: Arc<dyn TaskProvider>,
    /// Held for the duration of a sync run.
    pub sync_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: SqlitePool, provider: Arc<dyn TaskProvider>) -> Self {
        Self {
            db,
            provider,
            sync_lock: Arc::new(Mutex::new(())),
        }
    }
}
