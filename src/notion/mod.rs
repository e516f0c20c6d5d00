pub mod dto;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{ExternalTask, Priority, Task, TaskSource, TaskStatus};
use crate::sync::TaskProvider;

/// Property names of a task database. The title property is found by type.
const STATUS_PROPERTY: &str = "Status";
const DUE_PROPERTY: &str = "Due";
const PRIORITY_PROPERTY: &str = "Priority";
const DESCRIPTION_PROPERTY: &str = "Description";

const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct NotionConfig {
    pub api_token: String,
    pub base_url: String,
    pub notion_version: String,
}

/// Notion databases as external task lists.
pub struct NotionTaskProvider {
    client: Client,
    config: NotionConfig,
    /// Per database, dropped on every fetch so each sync reads it again.
    schemas: Mutex<HashMap<String, DatabaseSchema>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKind {
    Status,
    Select,
}

/// The writable task properties a database actually has.
#[derive(Debug, Clone, PartialEq)]
struct DatabaseSchema {
    title: String,
    status: Option<StatusKind>,
    due: bool,
    priority: bool,
    description: bool,
}

impl DatabaseSchema {
    fn from_response(database_id: &str, response: dto::DatabaseResponse) -> Result<Self, AppError> {
        let kind_of = |name: &str| response.properties.get(name).map(|p| p.kind.as_str());

        let title = response
            .properties
            .iter()
            .find(|(_, p)| p.kind == "title")
            .map(|(name, _)| name.clone())
            .ok_or_else(|| {
                AppError::Provider(format!("Notion database {} has no title property", database_id))
            })?;

        let status = match kind_of(STATUS_PROPERTY) {
            Some("status") => Some(StatusKind::Status),
            Some("select") => Some(StatusKind::Select),
            _ => None,
        };

        Ok(Self {
            title,
            status,
            due: kind_of(DUE_PROPERTY) == Some("date"),
            priority: kind_of(PRIORITY_PROPERTY) == Some("select"),
            description: kind_of(DESCRIPTION_PROPERTY) == Some("rich_text"),
        })
    }
}

impl NotionTaskProvider {
    pub fn new(config: NotionConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            config,
            schemas: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.config.base_url.trim_end_matches('/'), path);
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .header("Notion-Version", &self.config.notion_version)
    }

    async fn send(&self, builder: RequestBuilder, action: &str) -> Result<Response, AppError> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Notion request failed ({}): {}", action, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Notion API error {} ({}): {}",
                status, action, body
            )));
        }
        Ok(response)
    }

    async fn query_page(
        &self,
        database_id: &str,
        cursor: Option<String>,
    ) -> Result<dto::QueryDatabaseResponse, AppError> {
        let body = dto::QueryDatabaseRequest {
            start_cursor: cursor,
            page_size: Some(PAGE_SIZE),
        };
        let response = self
            .send(
                self.request(Method::POST, &format!("databases/{}/query", database_id))
                    .json(&body),
                "query database",
            )
            .await?;

        response
            .json::<dto::QueryDatabaseResponse>()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse Notion response: {}", e)))
    }

    async fn schema(&self, database_id: &str) -> Result<DatabaseSchema, AppError> {
        if let Some(schema) = self.schemas.lock().await.get(database_id) {
            return Ok(schema.clone());
        }

        let response = self
            .send(
                self.request(Method::GET, &format!("databases/{}", database_id)),
                "retrieve database",
            )
            .await?;
        let database = response
            .json::<dto::DatabaseResponse>()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse Notion response: {}", e)))?;
        let schema = DatabaseSchema::from_response(database_id, database)?;
        debug!("loaded schema of Notion database {}: {:?}", database_id, schema);

        self.schemas
            .lock()
            .await
            .insert(database_id.to_string(), schema.clone());
        Ok(schema)
    }
}

#[async_trait]
impl TaskProvider for NotionTaskProvider {
    fn source(&self) -> TaskSource {
        TaskSource::Notion
    }

    async fn fetch_tasks(&self, list_id: &str) -> Result<Vec<ExternalTask>, AppError> {
        self.schemas.lock().await.remove(list_id);

        let mut tasks = Vec::new();
        let mut cursor = None;

        loop {
            let response = self.query_page(list_id, cursor.take()).await?;
            for page in response.results.iter().filter(|p| !p.archived) {
                match parse_task_from_page(page) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!("Failed to parse task from page {}: {}", page.id, e),
                }
            }
            match (response.has_more, response.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        debug!("fetched {} tasks from Notion database {}", tasks.len(), list_id);
        Ok(tasks)
    }

    async fn create_task(&self, list_id: &str, task: &Task) -> Result<String, AppError> {
        let schema = self.schema(list_id).await?;
        let body = dto::CreatePageRequest {
            parent: dto::ParentDatabase {
                database_id: list_id.to_string(),
            },
            properties: task_properties(task, &schema),
        };
        let response = self
            .send(self.request(Method::POST, "pages").json(&body), "create page")
            .await?;
        let created = response
            .json::<dto::CreatedPage>()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse Notion response: {}", e)))?;

        Ok(created.id)
    }

    async fn update_task(&self, list_id: &str, external_id: &str, task: &Task) -> Result<(), AppError> {
        let schema = self.schema(list_id).await?;
        let body = dto::UpdatePageRequest {
            properties: Some(task_properties(task, &schema)),
            archived: None,
        };
        self.send(
            self.request(Method::PATCH, &format!("pages/{}", external_id)).json(&body),
            "update page",
        )
        .await?;
        Ok(())
    }

    async fn delete_task(&self, _list_id: &str, external_id: &str) -> Result<(), AppError> {
        let body = dto::UpdatePageRequest {
            properties: None,
            archived: Some(true),
        };
        let response = self
            .request(Method::PATCH, &format!("pages/{}", external_id))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Notion request failed (archive page): {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!("Notion page {} already gone", external_id);
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::Provider(format!(
                    "Notion API error {} (archive page): {}",
                    status, body
                )))
            }
        }
    }
}

fn task_properties(task: &Task, schema: &DatabaseSchema) -> serde_json::Value {
    let mut properties = json!({});

    properties[schema.title.as_str()] = json!({
        "title": [{ "text": { "content": task.title } }]
    });

    let status = json!({ "name": status_name(task.status) });
    match schema.status {
        Some(StatusKind::Status) => properties[STATUS_PROPERTY] = json!({ "status": status }),
        Some(StatusKind::Select) => properties[STATUS_PROPERTY] = json!({ "select": status }),
        None => {}
    }

    if schema.due {
        properties[DUE_PROPERTY] = match task.due_date {
            Some(due) => json!({ "date": { "start": due.to_rfc3339() } }),
            None => json!({ "date": null }),
        };
    }

    if schema.priority {
        properties[PRIORITY_PROPERTY] = match task.priority.and_then(priority_name) {
            Some(name) => json!({ "select": { "name": name } }),
            None => json!({ "select": null }),
        };
    }

    if schema.description {
        let rich_text = match task.description.as_deref() {
            Some(text) if !text.is_empty() => json!([{ "text": { "content": text } }]),
            _ => json!([]),
        };
        properties[DESCRIPTION_PROPERTY] = json!({ "rich_text": rich_text });
    }

    properties
}

fn parse_task_from_page(page: &dto::Page) -> Result<ExternalTask, AppError> {
    let title = page
        .properties
        .values()
        .find_map(|prop| match prop {
            dto::Property::Title { title } => Some(join_text(title)),
            _ => None,
        })
        .ok_or_else(|| AppError::BadRequest("Missing title property".to_string()))?;

    let status = match page.properties.get(STATUS_PROPERTY) {
        Some(dto::Property::Status { status: Some(option) })
        | Some(dto::Property::Select { select: Some(option) }) => parse_status(&option.name),
        _ => TaskStatus::Todo,
    };

    let due_date = match page.properties.get(DUE_PROPERTY) {
        Some(dto::Property::Date { date: Some(date) }) => Some(parse_date(&date.start)?),
        _ => None,
    };

    let priority = match page.properties.get(PRIORITY_PROPERTY) {
        Some(dto::Property::Select { select: Some(option) }) => parse_priority(&option.name),
        _ => None,
    };

    let description = match page.properties.get(DESCRIPTION_PROPERTY) {
        Some(dto::Property::RichText { rich_text }) => Some(join_text(rich_text)).filter(|d| !d.is_empty()),
        _ => None,
    };

    let updated_at = parse_date(&page.last_edited_time)?;

    Ok(ExternalTask {
        external_id: page.id.clone(),
        title,
        description,
        status,
        due_date,
        priority,
        completed_at: (status == TaskStatus::Completed).then_some(updated_at),
        updated_at,
    })
}

fn join_text(parts: &[dto::RichText]) -> String {
    parts.iter().map(|t| t.plain_text.as_str()).collect()
}

/// Accepts full RFC 3339 timestamps and bare dates (taken as UTC midnight).
fn parse_date(raw: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| AppError::BadRequest(format!("Invalid date: {}", raw)))
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "Not started",
        TaskStatus::InProgress => "In progress",
        TaskStatus::Completed => "Done",
        TaskStatus::Cancelled => "Cancelled",
    }
}

fn parse_status(name: &str) -> TaskStatus {
    match name.trim().to_lowercase().as_str() {
        "in progress" | "doing" => TaskStatus::InProgress,
        "done" | "complete" | "completed" => TaskStatus::Completed,
        "cancelled" | "canceled" => TaskStatus::Cancelled,
        _ => TaskStatus::Todo,
    }
}

fn priority_name(priority: Priority) -> Option<&'static str> {
    match priority {
        Priority::High => Some("High"),
        Priority::Medium => Some("Medium"),
        Priority::Low => Some("Low"),
        Priority::None => None,
    }
}

fn parse_priority(name: &str) -> Option<Priority> {
    match name.trim().to_lowercase().as_str() {
        "high" => Some(Priority::High),
        "medium" => Some(Priority::Medium),
        "low" => Some(Priority::Low),
        _ => None,
    }
}
