pub mod schedule_service;
pub mod scheduler;
pub mod sync_service;

pub use schedule_service::{ScheduleResult, ScheduleService, ScheduledTask};
pub use scheduler::SyncScheduler;
pub use sync_service::{SyncService, SyncStats};
