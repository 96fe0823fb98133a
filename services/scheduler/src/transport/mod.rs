//! Connection to the cluster manager.
//!
//! The scheduler talks to the manager through two seams:
//!
//! - [`ManagerTransport`]: outbound calls (`ACCEPT`, `KILL`, `ACKNOWLEDGE`, ...)
//! - [`EventSource`]: the inbound event stream, already decoded
//!
//! Wire framing and HTTP details live behind these traits. Two
//! implementations ship with the crate: [`SimulatedManager`] for local runs
//! and [`RecordingTransport`] for tests.

mod recording;
mod sim;

use async_trait::async_trait;
use fleet_events::{Call, CallKind, Event};
use thiserror::Error;
use tokio::sync::mpsc;

pub use recording::RecordingTransport;
pub use sim::{SimConfig, SimulatedManager};

/// Errors talking to the manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The manager refused or failed a call.
    #[error("{kind} call rejected: {message}")]
    Rejected { kind: CallKind, message: String },

    /// The connection to the manager is gone.
    #[error("manager connection closed")]
    Closed,

    /// The manager sent something we could not decode.
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Outbound half of the manager connection.
#[async_trait]
pub trait ManagerTransport: Send + Sync {
    /// Send one call and wait for the manager to accept it.
    ///
    /// Acceptance only means the call was received; outcomes arrive later as
    /// events.
    async fn send(&self, call: Call) -> Result<(), TransportError>;
}

/// Inbound half of the manager connection.
#[async_trait]
pub trait EventSource: Send {
    /// Next decoded event, or `None` when the stream has ended.
    async fn next_event(&mut self) -> Option<Result<Event, TransportError>>;
}

/// Event source fed from an in-process channel.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Result<Event, TransportError>>,
}

impl ChannelEventSource {
    /// Create a source and the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<Event, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<Result<Event, TransportError>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_ends_when_sender_dropped() {
        let (tx, mut source) = ChannelEventSource::channel(4);
        tx.send(Ok(Event::Heartbeat)).await.unwrap();
        tx.send(Err(TransportError::Malformed("garbage".into())))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(source.next_event().await, Some(Ok(Event::Heartbeat)));
        assert!(matches!(source.next_event().await, Some(Err(_))));
        assert!(source.next_event().await.is_none());
    }

    #[test]
    fn test_rejected_display() {
        let err = TransportError::Rejected {
            kind: CallKind::Kill,
            message: "unknown agent".into(),
        };
        assert_eq!(err.to_string(), "KILL call rejected: unknown agent");
    }
}
