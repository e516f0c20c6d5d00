pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notion;
pub mod recurrence;
pub mod scheduling;
pub mod services;
pub mod state;
pub mod sync;
