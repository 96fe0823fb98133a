//! Resource, offer and task definitions shared by events and calls.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use fleet_id::{AgentId, OfferId, TaskId};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Resource Names
// =============================================================================

/// Well-known resource names.
pub mod resource_names {
    pub const CPUS: &str = "cpus";
    pub const MEM: &str = "mem";
    pub const DISK: &str = "disk";
    pub const PORTS: &str = "ports";
}

// =============================================================================
// Resources
// =============================================================================

/// An inclusive range of values, e.g. a port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub begin: u64,
    pub end: u64,
}

impl ValueRange {
    /// A range covering exactly one value.
    pub fn single(value: u64) -> Self {
        Self {
            begin: value,
            end: value,
        }
    }
}

/// The value carried by a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceValue {
    Scalar { value: f64 },
    Ranges { ranges: Vec<ValueRange> },
    Set { items: Vec<String> },
}

/// A named resource on an offer or a task descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(flatten)]
    pub value: ResourceValue,
}

impl Resource {
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: ResourceValue::Scalar { value },
        }
    }

    pub fn ranges(name: impl Into<String>, ranges: Vec<ValueRange>) -> Self {
        Self {
            name: name.into(),
            value: ResourceValue::Ranges { ranges },
        }
    }

    /// Returns the scalar amount, if this is a scalar resource.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.value {
            ResourceValue::Scalar { value } => Some(value),
            _ => None,
        }
    }

    /// Expands range values into individual values, in offer order.
    pub fn range_values(&self) -> Vec<u64> {
        match &self.value {
            ResourceValue::Ranges { ranges } => ranges
                .iter()
                .flat_map(|r| r.begin..=r.end)
                .collect(),
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Offers
// =============================================================================

/// Resources available on one agent, redeemable exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub agent_id: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Offer {
    /// Whether the offer exposes a resource with the given name.
    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.iter().any(|r| r.name == name)
    }

    /// Total scalar amount offered for `name`.
    pub fn scalar(&self, name: &str) -> f64 {
        self.resources
            .iter()
            .filter(|r| r.name == name)
            .filter_map(Resource::as_scalar)
            .sum()
    }

    /// All offered ports, expanded from the `ports` ranges.
    pub fn ports(&self) -> Vec<u64> {
        self.resources
            .iter()
            .filter(|r| r.name == resource_names::PORTS)
            .flat_map(Resource::range_values)
            .collect()
    }
}

// =============================================================================
// Task Descriptor
// =============================================================================

/// Docker network mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DockerNetwork {
    #[default]
    None,
    Host,
    Bridge,
    User,
}

impl DockerNetwork {
    /// Maps an app-level network name; anything unrecognised is `None`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "host" => Self::Host,
            "bridge" => Self::Bridge,
            "user" => Self::User,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u32,
    pub container_port: u32,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeMode {
    #[default]
    Ro,
    Rw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub container_path: String,
    pub host_path: String,
    pub mode: VolumeMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerInfo {
    pub image: String,
    pub network: DockerNetwork,
    pub privileged: bool,
    pub force_pull_image: bool,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub docker: DockerInfo,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub shell: bool,
    pub value: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Health check executed by the agent on the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    pub id: Option<String>,
    pub address: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<u32>,
    pub port_index: Option<u32>,
    pub port_name: Option<String>,
    pub value: Option<String>,
    pub path: Option<String>,
    pub consecutive_failures: u32,
    pub grace_period_seconds: f64,
    pub interval_seconds: f64,
    pub timeout_seconds: f64,
    pub delay_seconds: f64,
}

/// Grace period between the kill signal and forced termination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillPolicy {
    pub duration: i64,
}

/// Everything the manager needs to launch one task on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub resources: Vec<Resource>,
    pub command: Option<CommandInfo>,
    pub container: Option<ContainerInfo>,
    pub health_check: Option<HealthCheck>,
    pub kill_policy: Option<KillPolicy>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

// =============================================================================
// Task Status
// =============================================================================

/// Task state reported by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_KILLING")]
    Killing,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_ERROR")]
    Error,
    #[serde(rename = "TASK_LOST")]
    Lost,
    #[serde(rename = "TASK_DROPPED")]
    Dropped,
    #[serde(rename = "TASK_UNREACHABLE")]
    Unreachable,
    #[serde(rename = "TASK_GONE")]
    Gone,
    #[serde(rename = "TASK_GONE_BY_OPERATOR")]
    GoneByOperator,
    #[serde(rename = "TASK_UNKNOWN")]
    Unknown,
}

impl TaskState {
    pub const ALL: [TaskState; 14] = [
        Self::Staging,
        Self::Starting,
        Self::Running,
        Self::Killing,
        Self::Finished,
        Self::Failed,
        Self::Killed,
        Self::Error,
        Self::Lost,
        Self::Dropped,
        Self::Unreachable,
        Self::Gone,
        Self::GoneByOperator,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "TASK_STAGING",
            Self::Starting => "TASK_STARTING",
            Self::Running => "TASK_RUNNING",
            Self::Killing => "TASK_KILLING",
            Self::Finished => "TASK_FINISHED",
            Self::Failed => "TASK_FAILED",
            Self::Killed => "TASK_KILLED",
            Self::Error => "TASK_ERROR",
            Self::Lost => "TASK_LOST",
            Self::Dropped => "TASK_DROPPED",
            Self::Unreachable => "TASK_UNREACHABLE",
            Self::Gone => "TASK_GONE",
            Self::GoneByOperator => "TASK_GONE_BY_OPERATOR",
            Self::Unknown => "TASK_UNKNOWN",
        }
    }

    /// States that mean the task failed or disappeared.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::Error
                | Self::Lost
                | Self::Dropped
                | Self::Unreachable
                | Self::Gone
                | Self::GoneByOperator
                | Self::Unknown
        )
    }

    /// States from which the task never transitions again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Killed) || self.is_failure()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EventError::UnknownTaskState(s.to_string()))
    }
}

/// Component that generated a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatusSource {
    #[serde(rename = "SOURCE_MASTER")]
    Master,
    #[serde(rename = "SOURCE_AGENT")]
    Agent,
    #[serde(rename = "SOURCE_EXECUTOR")]
    Executor,
}

impl fmt::Display for TaskStatusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Master => "SOURCE_MASTER",
            Self::Agent => "SOURCE_AGENT",
            Self::Executor => "SOURCE_EXECUTOR",
        })
    }
}

/// Opaque token the manager expects to be echoed back in an ACKNOWLEDGE call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckToken(pub String);

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A task status update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub agent_id: Option<AgentId>,
    /// Present when the manager requires an acknowledgment.
    pub uuid: Option<AckToken>,
    pub message: Option<String>,
    pub source: Option<TaskStatusSource>,
    pub reason: Option<String>,
    pub healthy: Option<bool>,
    pub timestamp: Option<f64>,
}

impl TaskStatus {
    /// A bare status with no diagnostics and no acknowledgment token.
    pub fn new(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            agent_id: None,
            uuid: None,
            message: None,
            source: None,
            reason: None,
            healthy: None,
            timestamp: None,
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_ack(mut self, token: impl Into<String>) -> Self {
        self.uuid = Some(AckToken(token.into()));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_source(mut self, source: TaskStatusSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn requires_ack(&self) -> bool {
        self.uuid.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
