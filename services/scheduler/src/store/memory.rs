//! In-memory store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fleet_id::{AppId, FrameworkId, TaskId};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Store, StoreError};
use crate::app::{App, TaskRecord};

#[derive(Default)]
struct Tables {
    framework_id: Option<FrameworkId>,
    apps: BTreeMap<AppId, App>,
    tasks: BTreeMap<AppId, BTreeMap<TaskId, TaskRecord>>,
}

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn framework_id(&self) -> Option<FrameworkId> {
        self.tables.read().await.framework_id.clone()
    }

    async fn update_framework_id(&self, id: FrameworkId) -> Result<(), StoreError> {
        debug!(framework_id = %id, "Stored framework id");
        self.tables.write().await.framework_id = Some(id);
        Ok(())
    }

    async fn create_app(&self, app: App) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.tasks.remove(&app.id);
        tables.apps.insert(app.id.clone(), app);
        Ok(())
    }

    async fn update_app(&self, app: App) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.apps.get_mut(&app.id) {
            Some(slot) => {
                *slot = app;
                Ok(())
            }
            None => Err(StoreError::AppNotFound(app.id)),
        }
    }

    async fn get_app(&self, id: &AppId) -> Result<App, StoreError> {
        self.tables
            .read()
            .await
            .apps
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::AppNotFound(id.clone()))
    }

    async fn list_apps(&self) -> Result<Vec<App>, StoreError> {
        Ok(self.tables.read().await.apps.values().cloned().collect())
    }

    async fn delete_app(&self, id: &AppId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .apps
            .remove(id)
            .ok_or_else(|| StoreError::AppNotFound(id.clone()))?;
        tables.tasks.remove(id);
        Ok(())
    }

    async fn list_tasks(&self, app_id: &AppId) -> Result<Vec<TaskRecord>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.apps.contains_key(app_id) {
            return Err(StoreError::AppNotFound(app_id.clone()));
        }
        Ok(tables
            .tasks
            .get(app_id)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.apps.contains_key(&task.app_id) {
            return Err(StoreError::AppNotFound(task.app_id));
        }
        tables
            .tasks
            .entry(task.app_id.clone())
            .or_default()
            .insert(task.id.clone(), task);
        Ok(())
    }
}
