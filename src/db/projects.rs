use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewProjectRequest, Project, ProjectStatus, UpdateProjectRequest};

const PROJECT_SELECT: &str = r#"
    SELECT
        p.id, p.name, p.description, p.color, p.status,
        (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id) AS task_count,
        p.created_at, p.updated_at
    FROM projects p
"#;

pub async fn fetch_projects(
    db: &SqlitePool,
    status: Option<ProjectStatus>,
) -> Result<Vec<Project>, sqlx::Error> {
    match status {
        Some(status) => {
            sqlx::query_as::<_, Project>(&format!("{PROJECT_SELECT} WHERE p.status = ? ORDER BY p.name"))
                .bind(status)
                .fetch_all(db)
                .await
        }
        None => {
            sqlx::query_as::<_, Project>(&format!("{PROJECT_SELECT} ORDER BY p.name"))
                .fetch_all(db)
                .await
        }
    }
}

pub async fn find_project(db: &SqlitePool, id: &str) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(&format!("{PROJECT_SELECT} WHERE p.id = ?"))
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn insert_project(
    db: &SqlitePool,
    req: NewProjectRequest,
    now: DateTime<Utc>,
) -> Result<Project, AppError> {
    let name = require_name(&req.name)?;
    let id = Uuid::new_v4().to_string();
    let status = req.status.unwrap_or_default();

    sqlx::query(
        "INSERT INTO projects (id, name, description, color, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&id)
    .bind(&name)
    .bind(&req.description)
    .bind(&req.color)
    .bind(status)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;

    Ok(Project {
        id,
        name,
        description: req.description,
        color: req.color,
        status,
        task_count: 0,
        created_at: now,
        updated_at: now,
    })
}

pub async fn update_project(
    db: &SqlitePool,
    id: &str,
    req: UpdateProjectRequest,
    now: DateTime<Utc>,
) -> Result<Option<Project>, AppError> {
    let Some(mut current) = find_project(db, id).await? else {
        return Ok(None);
    };

    if let Some(name) = req.name {
        current.name = require_name(&name)?;
    }
    if let Some(description) = req.description {
        current.description = description;
    }
    if let Some(color) = req.color {
        current.color = color;
    }
    if let Some(status) = req.status {
        current.status = status;
    }
    current.updated_at = now;

    sqlx::query(
        "UPDATE projects SET name = ?, description = ?, color = ?, status = ?, updated_at = ? WHERE id = ?"
    )
    .bind(&current.name)
    .bind(&current.description)
    .bind(&current.color)
    .bind(current.status)
    .bind(current.updated_at)
    .bind(id)
    .execute(db)
    .await?;

    Ok(Some(current))
}

/// Deletes the project. Its tasks stay, detached from any project, and
/// its sync mapping goes with it.
pub async fn delete_project(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

fn require_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{changes, connect_in_memory, mappings, tasks};
    use crate::models::{NewMappingRequest, NewTaskRequest, SyncDirection, TaskSource};

    fn new_project(name: &str) -> NewProjectRequest {
        NewProjectRequest {
            name: name.to_string(),
            description: None,
            color: Some("#336699".to_string()),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_project() {
        let pool = connect_in_memory().await.expect("Failed to create test db");

        let project = insert_project(&pool, new_project("  Work  "), Utc::now())
            .await
            .expect("Failed to insert project");
        assert_eq!(project.name, "Work");
        assert_eq!(project.status, ProjectStatus::Active);

        let projects = fetch_projects(&pool, None).await.expect("Failed to fetch projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].task_count, 0);

        let archived = fetch_projects(&pool, Some(ProjectStatus::Archived))
            .await
            .expect("Failed to fetch projects");
        assert!(archived.is_empty());
    }

    #[tokio::test]
    async fn test_update_project_clears_color() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let project = insert_project(&pool, new_project("Home"), Utc::now()).await.unwrap();

        let req: UpdateProjectRequest =
            serde_json::from_str(r#"{"color": null, "status": "ARCHIVED"}"#).unwrap();
        let updated = update_project(&pool, &project.id, req, Utc::now())
            .await
            .expect("Failed to update project")
            .expect("Project not found");

        assert_eq!(updated.color, None);
        assert_eq!(updated.status, ProjectStatus::Archived);
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let result = insert_project(&pool, new_project("   "), Utc::now()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_mapped_project_keeps_tasks() {
        let pool = connect_in_memory().await.expect("Failed to create test db");
        let project = insert_project(&pool, new_project("Synced"), Utc::now()).await.unwrap();
        let mapping = mappings::insert_mapping(
            &pool,
            NewMappingRequest {
                provider: TaskSource::Notion,
                external_list_id: "db-1".to_string(),
                project_id: project.id.clone(),
                direction: SyncDirection::Bidirectional,
                is_auto_scheduled: false,
            },
            Utc::now(),
        )
        .await
        .expect("Failed to insert mapping");
        let task = tasks::insert_task(
            &pool,
            NewTaskRequest {
                title: "Outlives its project".to_string(),
                project_id: Some(project.id.clone()),
                ..Default::default()
            },
            Utc::now(),
        )
        .await
        .expect("Failed to insert task");
        assert_eq!(changes::fetch_all_pending_changes(&pool).await.unwrap().len(), 1);

        assert!(delete_project(&pool, &project.id).await.expect("Failed to delete project"));
        assert!(!delete_project(&pool, &project.id).await.unwrap());

        let kept = tasks::find_task(&pool, &task.id)
            .await
            .unwrap()
            .expect("task should survive its project");
        assert_eq!(kept.project_id, None);
        assert!(mappings::find_mapping(&pool, &mapping.id).await.unwrap().is_none());
        assert!(changes::fetch_all_pending_changes(&pool).await.unwrap().is_empty());
    }
}
