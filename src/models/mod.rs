pub mod event;
pub mod mapping;
pub mod project;
pub mod settings;
pub mod tag;
pub mod task;
pub mod task_change;

pub use event::{CalendarEvent, EventRange, NewEventRequest};
pub use mapping::{NewMappingRequest, SyncDirection, TaskListMapping};
pub use project::{NewProjectRequest, Project, ProjectStatus, UpdateProjectRequest};
pub use settings::AutoScheduleSettings;
pub use tag::{NewTagRequest, Tag, UpdateTagRequest};
pub use task::{
    EnergyLevel, ExternalTask, NewTaskRequest, Priority, Task, TaskFilter, TaskSource, TaskStatus,
    TimePreference, UpdateTaskRequest,
};
pub use task_change::{ChangeType, TaskChange};
