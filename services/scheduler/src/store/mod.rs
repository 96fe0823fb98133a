//! Application and task persistence.
//!
//! The scheduler treats the store as a key-value map by id with
//! last-write-wins semantics. Only an in-memory backend ships here.

mod memory;

use async_trait::async_trait;
use fleet_id::{AppId, FrameworkId, TaskId};
use thiserror::Error;

use crate::app::{App, TaskRecord};

pub use memory::MemoryStore;

/// Store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("app not found: {0}")]
    AppNotFound(AppId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("unsupported store backend: {0}")]
    UnsupportedBackend(String),
}

/// Persistence seam for apps, tasks and the framework id.
#[async_trait]
pub trait Store: Send + Sync {
    /// Framework id issued by the manager on the last subscription.
    async fn framework_id(&self) -> Option<FrameworkId>;

    async fn update_framework_id(&self, id: FrameworkId) -> Result<(), StoreError>;

    /// Insert or replace an app record. Replacing drops the old record's tasks.
    async fn create_app(&self, app: App) -> Result<(), StoreError>;

    /// Replace an existing app record.
    async fn update_app(&self, app: App) -> Result<(), StoreError>;

    async fn get_app(&self, id: &AppId) -> Result<App, StoreError>;

    /// All apps, ordered by id.
    async fn list_apps(&self) -> Result<Vec<App>, StoreError>;

    /// Remove an app and all its task records.
    async fn delete_app(&self, id: &AppId) -> Result<(), StoreError>;

    /// Task records of `app_id`, ordered by id.
    async fn list_tasks(&self, app_id: &AppId) -> Result<Vec<TaskRecord>, StoreError>;

    /// Insert or replace a task record. The owning app must exist.
    async fn update_task(&self, task: TaskRecord) -> Result<(), StoreError>;
}
