//! In-process simulated cluster manager.
//!
//! Good enough to drive the scheduler end to end without a real cluster:
//!
//! - Emits `SUBSCRIBED`, then a fresh round of offers (one per agent) every
//!   `offer_interval`, rescinding the previous round's unused offers
//! - `ACCEPT` stages each launched task: `STAGING` is emitted right away and
//!   `RUNNING` once `STAGING` is acknowledged
//! - `KILL` emits `KILLED` for known tasks and `UNKNOWN` otherwise
//! - `DECLINE` and `TEARDOWN` are only logged; after `TEARDOWN` every call
//!   fails with [`TransportError::Closed`]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use fleet_events::{
    resource_names, AckToken, Call, Event, Offer, Operation, Resource, TaskState,
    TaskStatus, TaskStatusSource, ValueRange,
};
use fleet_id::{AgentId, FrameworkId, OfferId, TaskId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{ChannelEventSource, ManagerTransport, TransportError};

/// Simulated cluster shape.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub framework_id: String,
    pub agents: usize,
    pub offer_interval: Duration,
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub ports: ValueRange,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            framework_id: "sim-framework".to_string(),
            agents: 3,
            offer_interval: Duration::from_secs(1),
            cpus: 4.0,
            mem: 8192.0,
            disk: 20480.0,
            ports: ValueRange {
                begin: 31000,
                end: 31099,
            },
        }
    }
}

#[derive(Default)]
struct SimState {
    /// Offers sent in the latest round and not yet used.
    outstanding: HashSet<OfferId>,
    /// Live tasks and the agent they run on.
    tasks: HashMap<TaskId, AgentId>,
    /// Updates released one at a time as the previous one is acknowledged.
    queued: HashMap<TaskId, VecDeque<TaskStatus>>,
    /// Unacknowledged tokens and the task they belong to.
    pending_acks: HashMap<AckToken, TaskId>,
    offer_seq: u64,
    torn_down: bool,
}

/// Simulated manager; both the outbound transport and the event producer.
pub struct SimulatedManager {
    config: SimConfig,
    events: mpsc::Sender<Result<Event, TransportError>>,
    state: Mutex<SimState>,
}

impl SimulatedManager {
    /// Create the simulator and the event source that observes it.
    pub fn new(config: SimConfig) -> (Arc<Self>, ChannelEventSource) {
        let (events, source) = ChannelEventSource::channel(1024);
        let sim = Arc::new(Self {
            config,
            events,
            state: Mutex::new(SimState::default()),
        });
        (sim, source)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, event: Event) -> Result<(), TransportError> {
        self.events
            .send(Ok(event))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Emit `SUBSCRIBED`, then offer rounds until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let framework_id = match FrameworkId::parse(&self.config.framework_id) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "[SIM] Invalid framework id");
                return;
            }
        };

        info!(
            framework_id = %framework_id,
            agents = self.config.agents,
            "[SIM] Manager started"
        );

        if self
            .emit(Event::Subscribed {
                framework_id,
                heartbeat_interval_seconds: Some(15.0),
            })
            .await
            .is_err()
        {
            return;
        }

        let mut ticker = tokio::time::interval(self.config.offer_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.offer_round().await.is_err() {
                        debug!("[SIM] Event stream closed");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("[SIM] Manager shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Rescind the previous round's unused offers and send a new round.
    pub async fn offer_round(&self) -> Result<(), TransportError> {
        let (stale, offers) = {
            let mut state = self.state();
            if state.torn_down {
                return Ok(());
            }
            let stale: Vec<OfferId> = state.outstanding.drain().collect();
            let mut offers = Vec::with_capacity(self.config.agents);
            for agent in 0..self.config.agents {
                state.offer_seq += 1;
                let offer = self.make_offer(agent, state.offer_seq)?;
                state.outstanding.insert(offer.id.clone());
                offers.push(offer);
            }
            (stale, offers)
        };

        for offer_id in stale {
            self.emit(Event::Rescind { offer_id }).await?;
        }
        if !offers.is_empty() {
            self.emit(Event::Offers { offers }).await?;
        }
        Ok(())
    }

    fn make_offer(&self, agent: usize, seq: u64) -> Result<Offer, TransportError> {
        let malformed = |e: fleet_id::IdError| TransportError::Malformed(e.to_string());
        Ok(Offer {
            id: OfferId::parse(&format!("sim-offer-{seq}")).map_err(malformed)?,
            agent_id: AgentId::parse(&format!("sim-agent-{agent}")).map_err(malformed)?,
            hostname: format!("sim-node-{agent}"),
            resources: vec![
                Resource::scalar(resource_names::CPUS, self.config.cpus),
                Resource::scalar(resource_names::MEM, self.config.mem),
                Resource::scalar(resource_names::DISK, self.config.disk),
                Resource::ranges(resource_names::PORTS, vec![self.config.ports]),
            ],
        })
    }

    /// Number of tasks currently running in the simulation.
    pub fn task_count(&self) -> usize {
        self.state().tasks.len()
    }

    fn status(task_id: &TaskId, agent_id: &AgentId, state: TaskState) -> TaskStatus {
        TaskStatus::new(task_id.clone(), state)
            .with_agent(agent_id.clone())
            .with_source(TaskStatusSource::Agent)
            .with_ack(uuid::Uuid::new_v4().to_string())
    }

    /// Pops the next queued update for `task_id`, registering its token.
    fn release_next(state: &mut SimState, task_id: &TaskId) -> Option<TaskStatus> {
        let queue = state.queued.get_mut(task_id)?;
        let status = queue.pop_front();
        if queue.is_empty() {
            state.queued.remove(task_id);
        }
        let status = status?;
        if let Some(token) = &status.uuid {
            state.pending_acks.insert(token.clone(), task_id.clone());
        }
        Some(status)
    }

    fn handle_call(&self, call: Call) -> Result<Vec<Event>, TransportError> {
        let mut state = self.state();
        let kind = call.kind();
        if state.torn_down {
            return Err(TransportError::Closed);
        }

        let mut out = Vec::new();
        match call {
            Call::Accept {
                offer_ids,
                operations,
                ..
            } => {
                for offer_id in &offer_ids {
                    if !state.outstanding.remove(offer_id) {
                        return Err(TransportError::Rejected {
                            kind,
                            message: format!("offer {offer_id} is not outstanding"),
                        });
                    }
                }
                for Operation::Launch { task_infos } in operations {
                    for task in task_infos {
                        info!(
                            task_id = %task.task_id,
                            agent_id = %task.agent_id,
                            "[SIM] Launching task"
                        );
                        let queue = [TaskState::Staging, TaskState::Running]
                            .into_iter()
                            .map(|s| Self::status(&task.task_id, &task.agent_id, s))
                            .collect();
                        state.tasks.insert(task.task_id.clone(), task.agent_id.clone());
                        state.queued.insert(task.task_id.clone(), queue);
                        if let Some(first) = Self::release_next(&mut state, &task.task_id) {
                            out.push(Event::Update { status: first });
                        }
                    }
                }
            }
            Call::Decline { offer_ids, .. } => {
                for offer_id in &offer_ids {
                    state.outstanding.remove(offer_id);
                }
                debug!(offers = offer_ids.len(), "[SIM] Offers declined");
            }
            Call::Kill { task_id, .. } => {
                state.queued.remove(&task_id);
                let status = match state.tasks.remove(&task_id) {
                    Some(agent_id) => {
                        info!(task_id = %task_id, "[SIM] Killing task");
                        let status = Self::status(&task_id, &agent_id, TaskState::Killed);
                        if let Some(token) = &status.uuid {
                            state.pending_acks.insert(token.clone(), task_id.clone());
                        }
                        status
                    }
                    None => TaskStatus::new(task_id.clone(), TaskState::Unknown)
                        .with_source(TaskStatusSource::Master)
                        .with_message("task is not known to the manager"),
                };
                out.push(Event::Update { status });
            }
            Call::Acknowledge { uuid, .. } => {
                let Some(task_id) = state.pending_acks.remove(&uuid) else {
                    return Err(TransportError::Rejected {
                        kind,
                        message: format!("unknown acknowledgment token {uuid}"),
                    });
                };
                if let Some(next) = Self::release_next(&mut state, &task_id) {
                    out.push(Event::Update { status: next });
                }
            }
            Call::Teardown => {
                info!(tasks = state.tasks.len(), "[SIM] Framework torn down");
                state.torn_down = true;
                state.tasks.clear();
                state.queued.clear();
                state.outstanding.clear();
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl ManagerTransport for SimulatedManager {
    async fn send(&self, call: Call) -> Result<(), TransportError> {
        let kind = call.kind();
        let events = self.handle_call(call).inspect_err(|e| {
            warn!(call = %kind, error = %e, "[SIM] Call rejected");
        })?;

        for event in events {
            self.emit(event).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedManager")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EventSource;
    use fleet_events::{CallKind, TaskInfo};

    async fn next(source: &mut ChannelEventSource) -> Event {
        source.next_event().await.unwrap().unwrap()
    }

    fn task_for(offer: &Offer, id: &str) -> TaskInfo {
        TaskInfo {
            name: "web".to_string(),
            task_id: TaskId::parse(id).unwrap(),
            agent_id: offer.agent_id.clone(),
            resources: vec![],
            command: None,
            container: None,
            health_check: None,
            kill_policy: None,
            labels: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_offer_round_rescinds_previous() {
        let (sim, mut source) = SimulatedManager::new(SimConfig {
            agents: 2,
            ..SimConfig::default()
        });

        sim.offer_round().await.unwrap();
        let first = next(&mut source).await;
        assert_eq!(first.offers().len(), 2);
        assert!(first.offers()[0].has_resource("ports"));

        sim.offer_round().await.unwrap();
        assert_eq!(next(&mut source).await.kind(), fleet_events::EventKind::Rescind);
        assert_eq!(next(&mut source).await.kind(), fleet_events::EventKind::Rescind);
        assert_eq!(next(&mut source).await.offers().len(), 2);
    }

    #[tokio::test]
    async fn test_accept_then_ack_releases_running() {
        let (sim, mut source) = SimulatedManager::new(SimConfig {
            agents: 1,
            ..SimConfig::default()
        });
        sim.offer_round().await.unwrap();
        let offer = next(&mut source).await.offers()[0].clone();

        sim.send(Call::accept(&offer, task_for(&offer, "0.web.ops.sim")))
            .await
            .unwrap();
        let staging = next(&mut source).await.task_status().cloned().unwrap();
        assert_eq!(staging.state, TaskState::Staging);
        assert!(staging.requires_ack());

        sim.send(Call::acknowledge(&staging).unwrap()).await.unwrap();
        let running = next(&mut source).await.task_status().cloned().unwrap();
        assert_eq!(running.state, TaskState::Running);
        assert_eq!(sim.task_count(), 1);

        // The offer was consumed.
        let err = sim
            .send(Call::accept(&offer, task_for(&offer, "1.web.ops.sim")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected { kind: CallKind::Accept, .. }));
    }

    #[tokio::test]
    async fn test_kill_known_and_unknown_tasks() {
        let (sim, mut source) = SimulatedManager::new(SimConfig {
            agents: 1,
            ..SimConfig::default()
        });
        sim.offer_round().await.unwrap();
        let offer = next(&mut source).await.offers()[0].clone();
        sim.send(Call::accept(&offer, task_for(&offer, "0.web.ops.sim")))
            .await
            .unwrap();
        let _staging = next(&mut source).await;

        sim.send(Call::kill(TaskId::parse("0.web.ops.sim").unwrap(), None))
            .await
            .unwrap();
        let killed = next(&mut source).await.task_status().cloned().unwrap();
        assert_eq!(killed.state, TaskState::Killed);
        assert_eq!(sim.task_count(), 0);

        sim.send(Call::kill(TaskId::parse("9.web.ops.sim").unwrap(), None))
            .await
            .unwrap();
        let unknown = next(&mut source).await.task_status().cloned().unwrap();
        assert_eq!(unknown.state, TaskState::Unknown);
        assert!(!unknown.requires_ack());
    }

    #[tokio::test]
    async fn test_unknown_ack_token_rejected() {
        let (sim, _source) = SimulatedManager::new(SimConfig::default());
        let status = TaskStatus::new(TaskId::parse("0.a.b.c").unwrap(), TaskState::Running)
            .with_ack("bogus");
        let err = sim.send(Call::acknowledge(&status).unwrap()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { kind: CallKind::Acknowledge, .. }));
    }

    #[tokio::test]
    async fn test_teardown_closes_transport() {
        let (sim, _source) = SimulatedManager::new(SimConfig::default());
        sim.send(Call::Teardown).await.unwrap();
        assert_eq!(sim.send(Call::Teardown).await, Err(TransportError::Closed));
    }
}
