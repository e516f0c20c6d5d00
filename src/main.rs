use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planboard::api::router;
use planboard::config::AppConfig;
use planboard::db;
use planboard::notion::NotionTaskProvider;
use planboard::services::SyncScheduler;
use planboard::state::AppState;
use planboard::sync::{NoopTaskProvider, TaskProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "planboard=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let pool = db::connect(&config.database_url, config.db_max_connections).await?;

    let provider: Arc<dyn TaskProvider> = match config.notion.clone() {
        Some(notion) => {
            info!("Notion sync enabled ({})", notion.base_url);
            Arc::new(NotionTaskProvider::new(notion)?)
        }
        None => {
            info!("NOTION_TOKEN not set, task sync is disabled");
            Arc::new(NoopTaskProvider)
        }
    };

    let state = AppState::new(pool.clone(), provider.clone());

    if config.sync_interval_secs > 0 {
        let scheduler = SyncScheduler::new(
            pool,
            provider,
            state.sync_lock.clone(),
            config.sync_interval_secs,
        );
        tokio::spawn(scheduler.start());
    }

    let app = router(state);

    info!("listening on http://{}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
