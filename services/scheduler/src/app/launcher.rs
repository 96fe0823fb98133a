//! Launches and kills whole applications, one instance at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_events::{Offer, TaskState};
use fleet_id::{AppId, TaskId};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::model::{App, AppState, AppVersion, TaskRecord};
use crate::acquire::{AcquireError, ResourceRequest};
use crate::store::{Store, StoreError};
use crate::task::{build_task, host_ports, TaskCaller, TaskError};

/// Errors from launching or killing an app.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LaunchError {
    #[error("invalid app definition: {0}")]
    InvalidSpec(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("instance {index}: no offer acquired: {source}")]
    Offer {
        index: u32,
        #[source]
        source: AcquireError,
    },

    #[error("task {task_id}: {source}")]
    Task {
        task_id: TaskId,
        #[source]
        source: TaskError,
    },
}

/// Orchestrates app launches over the task call protocol.
pub struct AppLauncher {
    cluster: String,
    store: Arc<dyn Store>,
    caller: TaskCaller,
    offer_timeout: Option<Duration>,
}

impl AppLauncher {
    pub fn new(cluster: impl Into<String>, store: Arc<dyn Store>, caller: TaskCaller) -> Self {
        Self {
            cluster: cluster.into(),
            store,
            caller,
            offer_timeout: None,
        }
    }

    /// Bound each wait for a matching offer. `None` waits indefinitely.
    pub fn with_offer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.offer_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Launch every instance of `version`, in index order.
    ///
    /// The first failing instance aborts the rest and its error is returned.
    /// Instances already launched keep running; the app is marked `failed`.
    #[instrument(skip(self, version), fields(app_name = %version.app_name, instances = version.instances))]
    pub async fn launch_app(&self, version: AppVersion) -> Result<App, LaunchError> {
        version.validate().map_err(LaunchError::InvalidSpec)?;
        let id = AppId::compose(&version.app_name, &version.run_as, &self.cluster)
            .map_err(|e| LaunchError::InvalidSpec(e.to_string()))?;

        let mut app = App::creating(id, &self.cluster, version);
        self.store.create_app(app.clone()).await?;
        info!(app_id = %app.id, "Launching app");

        let request = app.version.resource_request();
        for index in 0..app.version.instances {
            if let Err(e) = self.launch_instance(&app, index, &request).await {
                warn!(app_id = %app.id, index, error = %e, "Instance launch failed, aborting app launch");
                app.error = Some(e.to_string());
                app.set_state(AppState::Failed);
                self.persist_app(&app).await;
                return Err(e);
            }
        }

        app.set_state(AppState::Running);
        self.store.update_app(app.clone()).await?;
        info!(app_id = %app.id, "App running");

        Ok(app)
    }

    async fn launch_instance(&self, app: &App, index: u32, request: &ResourceRequest) -> Result<(), LaunchError> {
        let task_id =
            TaskId::for_instance(index, &app.id).map_err(|e| LaunchError::InvalidSpec(e.to_string()))?;

        let offer = self
            .caller
            .acquirer()
            .acquire_offer(request, self.offer_timeout)
            .await
            .map_err(|source| LaunchError::Offer { index, source })?;

        let task = match build_task(&app.version, &task_id, &offer) {
            Ok(task) => task,
            Err(source) => {
                if let Err(e) = self.caller.decline(&offer).await {
                    warn!(offer_id = %offer.id, error = %e, "Failed to decline unusable offer");
                }
                return Err(LaunchError::Task { task_id, source });
            }
        };

        let mut record = new_record(app, &task_id, &offer, host_ports(&task));
        self.store.update_task(record.clone()).await?;

        match self.caller.launch(&offer, task).await {
            Ok(status) => {
                record.set_state(status.state);
                record.message = status.message;
                self.store.update_task(record).await?;
                Ok(())
            }
            Err(source) => {
                match &source {
                    TaskError::Terminal(failure) => {
                        record.set_state(failure.state);
                        record.message = Some(failure.message.clone());
                        record.reason = failure.reason.clone();
                        self.persist_task(record).await;
                    }
                    // The manager never saw the task; keep the record out of kill_app's way.
                    TaskError::NotDelivered { .. } => {
                        record.set_state(TaskState::Error);
                        record.message = Some(source.to_string());
                        self.persist_task(record).await;
                    }
                    _ => {}
                }
                Err(LaunchError::Task { task_id, source })
            }
        }
    }

    /// Kill every live task of `id`, then delete the app.
    ///
    /// Stops at the first task that fails to die; the app is marked `failed`
    /// and kept.
    #[instrument(skip(self))]
    pub async fn kill_app(&self, id: &AppId) -> Result<(), LaunchError> {
        let mut app = self.store.get_app(id).await?;
        app.set_state(AppState::Deleting);
        self.store.update_app(app.clone()).await?;

        for mut record in self.store.list_tasks(id).await? {
            if record.state.is_terminal() {
                continue;
            }

            match self.caller.kill(&record.id, Some(record.agent_id.clone())).await {
                Ok(status) => {
                    record.set_state(status.state);
                    self.store.update_task(record).await?;
                }
                Err(source) => {
                    let err = LaunchError::Task {
                        task_id: record.id.clone(),
                        source,
                    };
                    app.error = Some(err.to_string());
                    app.set_state(AppState::Failed);
                    self.persist_app(&app).await;
                    return Err(err);
                }
            }
        }

        self.store.delete_app(id).await?;
        info!(app_id = %id, "App deleted");
        Ok(())
    }

    // The error being reported takes precedence over a store failure here.
    async fn persist_app(&self, app: &App) {
        if let Err(e) = self.store.update_app(app.clone()).await {
            warn!(app_id = %app.id, error = %e, "Failed to persist app state");
        }
    }

    async fn persist_task(&self, record: TaskRecord) {
        let task_id = record.id.clone();
        if let Err(e) = self.store.update_task(record).await {
            warn!(task_id = %task_id, error = %e, "Failed to persist task state");
        }
    }
}

fn new_record(app: &App, task_id: &TaskId, offer: &Offer, host_ports: Vec<u64>) -> TaskRecord {
    let now = Utc::now();
    TaskRecord {
        id: task_id.clone(),
        app_id: app.id.clone(),
        version: app.version.app_version.clone(),
        state: TaskState::Staging,
        offer_id: offer.id.clone(),
        agent_id: offer.agent_id.clone(),
        agent_hostname: offer.hostname.clone(),
        host_ports,
        message: None,
        reason: None,
        created_at: now,
        updated_at: now,
    }
}
