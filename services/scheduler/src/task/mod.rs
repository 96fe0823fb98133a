//! Task lifecycle: descriptor building, the call protocol and classification.
//!
//! ## Protocol
//!
//! ```text
//! watch(task) ─► send(ACCEPT|KILL) ─► next update ─► ACK if tokened ─► done? ─┬─ no ──► next update
//!                                                                              └─ yes ─► classify
//! ```
//!
//! - An `ACCEPT` settles on `RUNNING`, `FINISHED` or `KILLED`
//! - A `KILL` settles on `FINISHED` or `KILLED`; `RUNNING` keeps waiting
//! - The error states (`FAILED`, `ERROR`, `LOST`, `DROPPED`, `UNREACHABLE`,
//!   `GONE`, `GONE_BY_OPERATOR`, `UNKNOWN`) settle either call with a
//!   [`TaskFailure`]
//!
//! Send and acknowledgment failures abort the loop. A failed send is reported
//! as [`TaskError::NotDelivered`]; a failed acknowledgment as
//! [`TaskError::Transport`]. Nothing is retried here.

mod builder;
mod classify;
mod protocol;

use fleet_events::CallKind;
use thiserror::Error;

use crate::acquire::AcquireError;
use crate::transport::TransportError;

pub use builder::{build_task, host_ports};
pub use classify::{detect_failure, Completion, TaskFailure};
pub use protocol::TaskCaller;

/// Errors from a task call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The call itself never reached the manager, so nothing changed there.
    #[error("{kind} call not delivered: {source}")]
    NotDelivered {
        kind: CallKind,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    /// The manager reported an error state; displays the JSON diagnostic.
    #[error("task {task} failed: {0}", task = .0.task_id)]
    Terminal(TaskFailure),

    #[error("offer has {offered} ports, task needs {needed}")]
    InsufficientPorts { needed: usize, offered: usize },
}
