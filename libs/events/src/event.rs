//! Events pushed by the cluster manager to the scheduler.

use std::fmt;
use std::str::FromStr;

use fleet_id::{AgentId, FrameworkId, OfferId, TaskId};
use serde::{Deserialize, Serialize};

use crate::{EventError, Offer, TaskStatus};

/// A decoded manager event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// The manager accepted our subscription.
    Subscribed {
        framework_id: FrameworkId,
        heartbeat_interval_seconds: Option<f64>,
    },

    /// New resource offers.
    Offers { offers: Vec<Offer> },

    /// A previously sent offer is no longer valid.
    Rescind { offer_id: OfferId },

    /// A task changed state.
    Update { status: TaskStatus },

    /// Opaque data relayed from an executor.
    Message {
        agent_id: AgentId,
        executor_id: String,
        data: String,
    },

    /// An agent or executor failed.
    Failure {
        agent_id: Option<AgentId>,
        executor_id: Option<String>,
        status: Option<i32>,
    },

    /// The manager reported an unrecoverable error for this framework.
    Error { message: String },

    /// Periodic keepalive.
    Heartbeat,
}

/// Discriminant of an [`Event`], used for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Subscribed,
    Offers,
    Rescind,
    Update,
    Message,
    Failure,
    Error,
    Heartbeat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribed => "SUBSCRIBED",
            Self::Offers => "OFFERS",
            Self::Rescind => "RESCIND",
            Self::Update => "UPDATE",
            Self::Message => "MESSAGE",
            Self::Failure => "FAILURE",
            Self::Error => "ERROR",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBSCRIBED" => Ok(Self::Subscribed),
            "OFFERS" => Ok(Self::Offers),
            "RESCIND" => Ok(Self::Rescind),
            "UPDATE" => Ok(Self::Update),
            "MESSAGE" => Ok(Self::Message),
            "FAILURE" => Ok(Self::Failure),
            "ERROR" => Ok(Self::Error),
            "HEARTBEAT" => Ok(Self::Heartbeat),
            other => Err(EventError::UnknownEventType(other.to_string())),
        }
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Subscribed { .. } => EventKind::Subscribed,
            Self::Offers { .. } => EventKind::Offers,
            Self::Rescind { .. } => EventKind::Rescind,
            Self::Update { .. } => EventKind::Update,
            Self::Message { .. } => EventKind::Message,
            Self::Failure { .. } => EventKind::Failure,
            Self::Error { .. } => EventKind::Error,
            Self::Heartbeat => EventKind::Heartbeat,
        }
    }

    /// Offers carried by an `OFFERS` event; empty for every other kind.
    pub fn offers(&self) -> &[Offer] {
        match self {
            Self::Offers { offers } => offers,
            _ => &[],
        }
    }

    /// Status carried by an `UPDATE` event.
    pub fn task_status(&self) -> Option<&TaskStatus> {
        match self {
            Self::Update { status } => Some(status),
            _ => None,
        }
    }

    /// Whether this is an `UPDATE` for the given task.
    pub fn is_update_for(&self, task_id: &TaskId) -> bool {
        self.task_status().is_some_and(|s| &s.task_id == task_id)
    }

    /// Decodes an event from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(json)?)
    }
}
