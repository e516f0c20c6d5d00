use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::AppError;
use crate::notion::NotionConfig;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://planboard.db?mode=rwc";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_NOTION_API_BASE: &str = "https://api.notion.com";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    /// `0` disables the background sync/schedule loop.
    pub sync_interval_secs: u64,
    pub notion: Option<NotionConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 5u32)?;
        let bind_addr = parse_or(
            &lookup,
            "BIND_ADDR",
            SocketAddr::from_str(DEFAULT_BIND_ADDR)
                .map_err(|e| AppError::Config(format!("default bind address: {}", e)))?,
        )?;
        let sync_interval_secs = parse_or(&lookup, "SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;

        let notion = lookup("NOTION_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .map(|api_token| NotionConfig {
                api_token,
                base_url: lookup("NOTION_API_BASE")
                    .unwrap_or_else(|| DEFAULT_NOTION_API_BASE.to_string()),
                notion_version: lookup("NOTION_VERSION")
                    .unwrap_or_else(|| DEFAULT_NOTION_VERSION.to_string()),
            });

        if db_max_connections == 0 {
            return Err(AppError::Config("DB_MAX_CONNECTIONS must be positive".to_string()));
        }

        Ok(Self {
            database_url,
            db_max_connections,
            bind_addr,
            sync_interval_secs,
            notion,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("{} is invalid: {}", key, e))),
        None => Ok(default),
    }
}
