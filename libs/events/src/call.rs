//! Calls sent by the scheduler to the cluster manager.

use std::fmt;

use fleet_id::{AgentId, OfferId, TaskId};
use serde::{Deserialize, Serialize};

use crate::{AckToken, Offer, TaskInfo, TaskStatus};

/// Seconds the manager should withhold re-offering resources we declined or
/// left unused in an accept.
pub const DEFAULT_REFUSE_SECONDS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub refuse_seconds: f64,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            refuse_seconds: DEFAULT_REFUSE_SECONDS,
        }
    }
}

/// An operation applied to accepted offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Launch { task_infos: Vec<TaskInfo> },
}

/// A command for the cluster manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Call {
    Accept {
        offer_ids: Vec<OfferId>,
        operations: Vec<Operation>,
        filters: Option<Filters>,
    },
    Decline {
        offer_ids: Vec<OfferId>,
        filters: Option<Filters>,
    },
    Kill {
        task_id: TaskId,
        agent_id: Option<AgentId>,
    },
    Acknowledge {
        agent_id: Option<AgentId>,
        task_id: TaskId,
        uuid: AckToken,
    },
    Teardown,
}

/// Discriminant of a [`Call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Accept,
    Decline,
    Kill,
    Acknowledge,
    Teardown,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accept => "ACCEPT",
            Self::Decline => "DECLINE",
            Self::Kill => "KILL",
            Self::Acknowledge => "ACKNOWLEDGE",
            Self::Teardown => "TEARDOWN",
        })
    }
}

impl Call {
    /// Accepts one offer and launches one task on it.
    pub fn accept(offer: &Offer, task: TaskInfo) -> Self {
        Self::Accept {
            offer_ids: vec![offer.id.clone()],
            operations: vec![Operation::Launch {
                task_infos: vec![task],
            }],
            filters: Some(Filters::default()),
        }
    }

    pub fn decline(offer_ids: Vec<OfferId>) -> Self {
        Self::Decline {
            offer_ids,
            filters: Some(Filters::default()),
        }
    }

    pub fn kill(task_id: TaskId, agent_id: Option<AgentId>) -> Self {
        Self::Kill { task_id, agent_id }
    }

    /// Builds the acknowledgment for `status`, or `None` if it carries no token.
    pub fn acknowledge(status: &TaskStatus) -> Option<Self> {
        let uuid = status.uuid.clone()?;
        Some(Self::Acknowledge {
            agent_id: status.agent_id.clone(),
            task_id: status.task_id.clone(),
            uuid,
        })
    }

    pub fn kind(&self) -> CallKind {
        match self {
            Self::Accept { .. } => CallKind::Accept,
            Self::Decline { .. } => CallKind::Decline,
            Self::Kill { .. } => CallKind::Kill,
            Self::Acknowledge { .. } => CallKind::Acknowledge,
            Self::Teardown => CallKind::Teardown,
        }
    }

    /// Task IDs launched by an `ACCEPT`; empty for every other kind.
    pub fn launched_tasks(&self) -> Vec<&TaskInfo> {
        match self {
            Self::Accept { operations, .. } => operations
                .iter()
                .flat_map(|op| match op {
                    Operation::Launch { task_infos } => task_infos.iter(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
