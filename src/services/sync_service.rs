use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{changes, mappings, tasks};
use crate::error::AppError;
use crate::models::{ChangeType, ExternalTask, Task, TaskChange, TaskListMapping};
use crate::sync::TaskProvider;

pub struct SyncService {
    db: SqlitePool,
    provider: Arc<dyn TaskProvider>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    pub mappings: usize,
    pub pushed_created: usize,
    pub pushed_updated: usize,
    pub pushed_deleted: usize,
    pub pulled_created: usize,
    pub pulled_updated: usize,
    pub pulled_deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncService {
    /// `lock` is shared by everything that may start a sync so runs never overlap.
    pub fn new(db: SqlitePool, provider: Arc<dyn TaskProvider>, lock: Arc<Mutex<()>>) -> Self {
        Self { db, provider, lock }
    }

    pub async fn sync_all(&self) -> Result<SyncStats, AppError> {
        let _guard = self
            .lock
            .try_lock()
            .map_err(|_| AppError::Conflict("sync already in progress".to_string()))?;

        let mut stats = SyncStats::default();
        if !self.provider.is_configured() {
            warn!("No task provider configured, skipping sync");
            return Ok(stats);
        }

        info!("Starting sync...");
        let source = self.provider.source();

        for mapping in mappings::fetch_mappings(&self.db).await? {
            if mapping.provider != source {
                continue;
            }
            match self.sync_mapping(&mapping, &mut stats).await {
                Ok(()) => stats.mappings += 1,
                Err(e) => {
                    warn!("Sync of mapping {} failed: {}", mapping.id, e);
                    stats.failed += 1;
                }
            }
        }

        info!("Sync completed: {:?}", stats);
        Ok(stats)
    }

    async fn sync_mapping(&self, mapping: &TaskListMapping, stats: &mut SyncStats) -> Result<(), AppError> {
        let now = Utc::now();

        info!("Step 1: Pushing local changes of project {}", mapping.project_id);
        let still_pending = self.push_local_changes(mapping, now, stats).await?;

        if mapping.direction.pulls() {
            info!("Step 2: Pulling tasks from list {}", mapping.external_list_id);
            self.pull_remote_tasks(mapping, still_pending, now, stats).await?;
        }

        mappings::touch_mapping(&self.db, &mapping.id, now).await?;
        Ok(())
    }

    /// Pushes queued changes grouped per task. Returns the tasks whose
    /// push failed; their changes stay queued for the next run.
    async fn push_local_changes(
        &self,
        mapping: &TaskListMapping,
        now: DateTime<Utc>,
        stats: &mut SyncStats,
    ) -> Result<HashSet<String>, AppError> {
        let pending = changes::fetch_pending_changes(&self.db, &mapping.id).await?;
        if pending.is_empty() {
            return Ok(HashSet::new());
        }

        if !mapping.direction.pushes() {
            let ids: Vec<String> = pending.into_iter().map(|c| c.id).collect();
            info!("Discarding {} changes of incoming-only mapping {}", ids.len(), mapping.id);
            changes::mark_changes_synced(&self.db, &ids).await?;
            return Ok(HashSet::new());
        }

        let mut order = Vec::new();
        let mut groups: HashMap<String, Vec<TaskChange>> = HashMap::new();
        for change in pending {
            if !groups.contains_key(&change.task_id) {
                order.push(change.task_id.clone());
            }
            groups.entry(change.task_id.clone()).or_default().push(change);
        }

        let mut still_pending = HashSet::new();
        for task_id in order {
            let group = groups.remove(&task_id).unwrap_or_default();
            match self.push_task(mapping, &task_id, &group, now, stats).await {
                Ok(()) => {
                    let ids: Vec<String> = group.into_iter().map(|c| c.id).collect();
                    changes::mark_changes_synced(&self.db, &ids).await?;
                }
                Err(e) => {
                    warn!("Failed to push task {}: {}", task_id, e);
                    stats.failed += 1;
                    still_pending.insert(task_id);
                }
            }
        }

        Ok(still_pending)
    }

    async fn push_task(
        &self,
        mapping: &TaskListMapping,
        task_id: &str,
        group: &[TaskChange],
        now: DateTime<Utc>,
        stats: &mut SyncStats,
    ) -> Result<(), AppError> {
        let list_id = mapping.external_list_id.as_str();
        let deleted = group
            .last()
            .is_some_and(|c| c.change_type == ChangeType::Delete);

        // The task as it should exist remotely, if at all.
        let task = if deleted {
            None
        } else {
            tasks::find_task(&self.db, task_id)
                .await?
                .filter(|t| t.project_id.as_deref() == Some(mapping.project_id.as_str()))
        };
        let current_external = task.as_ref().and_then(|t| t.external_task_id.as_deref());

        for change in group.iter().filter(|c| c.change_type == ChangeType::Delete) {
            let Some(external_id) = change.change_data.get("external_task_id").and_then(|v| v.as_str()) else {
                continue;
            };
            if current_external != Some(external_id) {
                self.provider.delete_task(list_id, external_id).await?;
                stats.pushed_deleted += 1;
            }
        }

        let Some(task) = task else {
            return Ok(());
        };
        match task.external_task_id.as_deref() {
            None => {
                let external_id = self.provider.create_task(list_id, &task).await?;
                tasks::mark_task_synced(&self.db, &task.id, &external_id, list_id, self.provider.source(), now)
                    .await?;
                stats.pushed_created += 1;
            }
            Some(external_id) => {
                self.provider.update_task(list_id, external_id, &task).await?;
                tasks::mark_task_synced(&self.db, &task.id, external_id, list_id, self.provider.source(), now)
                    .await?;
                stats.pushed_updated += 1;
            }
        }
        Ok(())
    }

    async fn pull_remote_tasks(
        &self,
        mapping: &TaskListMapping,
        mut still_pending: HashSet<String>,
        now: DateTime<Utc>,
        stats: &mut SyncStats,
    ) -> Result<(), AppError> {
        let remote_tasks = self.provider.fetch_tasks(&mapping.external_list_id).await?;

        // Local edits made while the fetch was in flight are pending too.
        still_pending.extend(
            changes::fetch_pending_changes(&self.db, &mapping.id)
                .await?
                .into_iter()
                .map(|c| c.task_id),
        );

        let mut local_by_external: HashMap<String, Task> = tasks::fetch_mapped_tasks(&self.db, &mapping.project_id)
            .await?
            .into_iter()
            .filter_map(|t| t.external_task_id.clone().map(|ext| (ext, t)))
            .collect();

        for remote in remote_tasks {
            match local_by_external.remove(&remote.external_id) {
                Some(existing) => {
                    if still_pending.contains(&existing.id) {
                        warn!("Skipping task (local pending): {}", existing.title);
                        stats.skipped += 1;
                        continue;
                    }
                    let remote_is_newer = existing
                        .last_synced_at
                        .is_none_or(|synced| remote.updated_at > synced);
                    if remote_is_newer {
                        tasks::apply_remote_update(&self.db, &existing, &remote, now).await?;
                        stats.pulled_updated += 1;
                    }
                }
                None => {
                    let task = task_from_remote(&remote, mapping, self.provider.as_ref(), now);
                    tasks::insert_synced_task(&self.db, &task).await?;
                    stats.pulled_created += 1;
                }
            }
        }

        // Whatever is left was removed on the provider side.
        for task in local_by_external.into_values() {
            if still_pending.contains(&task.id) {
                warn!("Keeping remotely deleted task (local pending): {}", task.title);
                stats.skipped += 1;
                continue;
            }
            tasks::delete_task_silently(&self.db, &task.id).await?;
            stats.pulled_deleted += 1;
        }

        Ok(())
    }
}

fn task_from_remote(
    remote: &ExternalTask,
    mapping: &TaskListMapping,
    provider: &dyn TaskProvider,
    now: DateTime<Utc>,
) -> Task {
    Task {
        id: Uuid::new_v4().to_string(),
        title: remote.title.clone(),
        description: remote.description.clone(),
        status: remote.status,
        due_date: remote.due_date,
        start_date: None,
        duration: None,
        priority: remote.priority,
        energy_level: None,
        preferred_time: None,
        project_id: Some(mapping.project_id.clone()),
        tags: Vec::new(),
        is_recurring: false,
        recurrence_rule: None,
        last_completed_date: None,
        completed_at: remote.completed_at,
        is_auto_scheduled: mapping.is_auto_scheduled && remote.status.is_open(),
        schedule_locked: false,
        scheduled_start: None,
        scheduled_end: None,
        schedule_score: None,
        last_scheduled: None,
        postponed_until: None,
        external_task_id: Some(remote.external_id.clone()),
        source: provider.source(),
        external_list_id: Some(mapping.external_list_id.clone()),
        last_synced_at: Some(now),
        created_at: now,
        updated_at: now,
    }
}
