//! Call-and-acknowledge loop for launching and killing tasks.

use std::sync::Arc;
use std::time::Duration;

use fleet_events::{Call, Offer, TaskInfo, TaskStatus};
use fleet_id::{AgentId, TaskId};
use tracing::{debug, info, instrument, warn};

use super::classify::{detect_failure, Completion};
use super::TaskError;
use crate::acquire::{Acquirer, TaskWatch};
use crate::transport::ManagerTransport;

/// Drives `ACCEPT` and `KILL` calls until the task settles.
///
/// For every call the task's update watch is registered before the call is
/// sent, then each update is acknowledged (when it carries a token) before
/// it is classified.
#[derive(Clone)]
pub struct TaskCaller {
    transport: Arc<dyn ManagerTransport>,
    acquirer: Acquirer,
    update_timeout: Option<Duration>,
}

impl TaskCaller {
    pub fn new(transport: Arc<dyn ManagerTransport>, acquirer: Acquirer) -> Self {
        Self {
            transport,
            acquirer,
            update_timeout: None,
        }
    }

    /// Bound each wait for a task update. `None` waits indefinitely.
    pub fn with_update_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.update_timeout = timeout;
        self
    }

    pub fn acquirer(&self) -> &Acquirer {
        &self.acquirer
    }

    /// Accept `offer` with `task` and wait until the task runs or ends.
    ///
    /// Returns the settling status: `RUNNING`, `FINISHED` or `KILLED`.
    #[instrument(skip(self, offer, task), fields(task_id = %task.task_id, offer_id = %offer.id))]
    pub async fn launch(&self, offer: &Offer, task: TaskInfo) -> Result<TaskStatus, TaskError> {
        let mut watch = self.acquirer.watch_task(&task.task_id);

        info!(agent_id = %task.agent_id, "Launching task");
        self.deliver(Call::accept(offer, task)).await?;

        self.settle(&mut watch, Completion::Launch).await
    }

    /// Kill `task_id` and wait until the manager reports it stopped.
    #[instrument(skip(self, agent_id))]
    pub async fn kill(&self, task_id: &TaskId, agent_id: Option<AgentId>) -> Result<TaskStatus, TaskError> {
        let mut watch = self.acquirer.watch_task(task_id);

        info!("Killing task");
        self.deliver(Call::kill(task_id.clone(), agent_id)).await?;

        self.settle(&mut watch, Completion::Kill).await
    }

    /// Hand an unused offer back to the manager.
    pub async fn decline(&self, offer: &Offer) -> Result<(), TaskError> {
        debug!(offer_id = %offer.id, "Declining offer");
        self.deliver(Call::decline(vec![offer.id.clone()])).await
    }

    async fn deliver(&self, call: Call) -> Result<(), TaskError> {
        let kind = call.kind();
        self.transport
            .send(call)
            .await
            .map_err(|source| TaskError::NotDelivered { kind, source })
    }

    async fn settle(&self, watch: &mut TaskWatch, completion: Completion) -> Result<TaskStatus, TaskError> {
        loop {
            let status = watch.next(self.update_timeout).await?;
            debug!(
                state = %status.state,
                needs_ack = status.requires_ack(),
                "Task update"
            );

            if let Some(ack) = Call::acknowledge(&status) {
                self.transport.send(ack).await.inspect_err(|e| {
                    warn!(state = %status.state, error = %e, "Acknowledgment failed");
                })?;
            }

            if !completion.is_done(status.state) {
                continue;
            }

            if let Some(failure) = detect_failure(&status) {
                warn!(%completion, state = %status.state, "Task ended in error");
                return Err(TaskError::Terminal(failure));
            }

            info!(%completion, state = %status.state, "Task settled");
            return Ok(status);
        }
    }
}
