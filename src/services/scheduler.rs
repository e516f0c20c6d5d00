use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::AppError;
use crate::services::{ScheduleService, SyncService};
use crate::sync::TaskProvider;

/// Background loop that syncs every mapping and then replans the calendar.
pub struct SyncScheduler {
    db: SqlitePool,
    provider: Arc<dyn TaskProvider>,
    sync_lock: Arc<Mutex<()>>,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(
        db: SqlitePool,
        provider: Arc<dyn TaskProvider>,
        sync_lock: Arc<Mutex<()>>,
        interval_secs: u64,
    ) -> Self {
        Self {
            db,
            provider,
            sync_lock,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Runs forever; a failed cycle is logged and the next one still runs.
    pub async fn start(self) {
        info!("Starting auto-sync scheduler (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;
            self.run_cycle().await;
        }
    }

    pub async fn run_cycle(&self) {
        let sync = SyncService::new(self.db.clone(), self.provider.clone(), self.sync_lock.clone());
        match sync.sync_all().await {
            Ok(stats) => info!(
                "Auto-sync completed - Pushed: {} created, {} updated, {} deleted | Pulled: {} created, {} updated, {} deleted",
                stats.pushed_created,
                stats.pushed_updated,
                stats.pushed_deleted,
                stats.pulled_created,
                stats.pulled_updated,
                stats.pulled_deleted
            ),
            Err(AppError::Conflict(_)) => info!("Auto-sync skipped: another sync is running"),
            Err(e) => warn!("Auto-sync failed: {:?}", e),
        }

        let schedule = ScheduleService::new(self.db.clone());
        if let Err(e) = schedule.schedule_all(Utc::now()).await {
            warn!("Auto-schedule failed: {:?}", e);
        }
    }
}
