//! The single reader that feeds manager events into the bus.
//!
//! Events are published one at a time, in arrival order, so each waiter sees
//! them in the order the manager sent them.

use std::sync::Arc;

use fleet_events::Event;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::bus::EventBus;
use crate::store::Store;
use crate::transport::{EventSource, TransportError};

/// Counters for one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Events published to the bus.
    pub published: u64,
    /// Undecodable events that were skipped.
    pub malformed: u64,
    /// Deliveries the bus dropped on full mailboxes.
    pub dropped_deliveries: u64,
}

/// Pulls events from an [`EventSource`] and publishes them.
pub struct EventPump<S> {
    source: S,
    bus: EventBus,
    store: Arc<dyn Store>,
}

impl<S: EventSource> EventPump<S> {
    pub fn new(source: S, bus: EventBus, store: Arc<dyn Store>) -> Self {
        Self { source, bus, store }
    }

    /// Run until shutdown or the end of the stream.
    ///
    /// Malformed events are skipped. A closed connection ends the run with
    /// an error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<PumpStats, TransportError> {
        info!("Starting event pump");
        let mut stats = PumpStats::default();

        loop {
            let next = tokio::select! {
                next = self.source.next_event() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(published = stats.published, "Event pump shutting down");
                        return Ok(stats);
                    }
                    continue;
                }
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(TransportError::Malformed(message))) => {
                    warn!(error = %message, "Skipping malformed event");
                    stats.malformed += 1;
                    continue;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Event stream failed");
                    return Err(e);
                }
                None => {
                    info!(published = stats.published, "Event stream ended");
                    return Ok(stats);
                }
            };

            Self::observe(self.store.as_ref(), &event).await;

            let report = self.bus.publish(event).await;
            stats.published += 1;
            stats.dropped_deliveries += report.dropped as u64;
        }
    }

    async fn observe(store: &dyn Store, event: &Event) {
        match event {
            Event::Subscribed {
                framework_id,
                heartbeat_interval_seconds,
            } => {
                info!(
                    framework_id = %framework_id,
                    heartbeat_interval_seconds = heartbeat_interval_seconds.unwrap_or_default(),
                    "Subscribed to manager"
                );
                if let Err(e) = store.update_framework_id(framework_id.clone()).await {
                    warn!(error = %e, "Failed to store framework id");
                }
            }
            Event::Error { message } => {
                error!(error = %message, "Manager reported framework error");
            }
            Event::Failure {
                agent_id,
                executor_id,
                status,
            } => {
                warn!(
                    agent_id = ?agent_id,
                    executor_id = ?executor_id,
                    status = ?status,
                    "Manager reported agent or executor failure"
                );
            }
            Event::Offers { offers } => {
                debug!(count = offers.len(), "Received offers");
            }
            Event::Update { status } => {
                debug!(task_id = %status.task_id, state = %status.state, "Received task update");
            }
            Event::Heartbeat => trace!("Heartbeat"),
            Event::Rescind { offer_id } => debug!(offer_id = %offer_id, "Offer rescinded"),
            Event::Message { agent_id, .. } => debug!(agent_id = %agent_id, "Executor message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::ChannelEventSource;
    use fleet_events::EventKind;
    use fleet_id::FrameworkId;

    #[tokio::test]
    async fn test_pump_publishes_in_order_and_records_framework() {
        let bus = EventBus::default();
        let store = Arc::new(MemoryStore::new());
        let (tx, source) = ChannelEventSource::channel(8);
        let mut all = bus.subscribe_all();

        tx.send(Ok(Event::Subscribed {
            framework_id: FrameworkId::parse("fw-9").unwrap(),
            heartbeat_interval_seconds: None,
        }))
        .await
        .unwrap();
        tx.send(Err(TransportError::Malformed("bad".into()))).await.unwrap();
        tx.send(Ok(Event::Heartbeat)).await.unwrap();
        drop(tx);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = EventPump::new(source, bus.clone(), store.clone())
            .run(shutdown_rx)
            .await
            .unwrap();

        assert_eq!(stats.published, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(all.recv().await.unwrap().kind(), EventKind::Subscribed);
        assert_eq!(all.recv().await.unwrap().kind(), EventKind::Heartbeat);
        assert_eq!(store.framework_id().await.unwrap().as_str(), "fw-9");
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown_and_closed_stream() {
        let bus = EventBus::default();
        let store = Arc::new(MemoryStore::new());

        let (_tx, source) = ChannelEventSource::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(EventPump::new(source, bus.clone(), store.clone()).run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), Ok(PumpStats::default()));

        let (tx, source) = ChannelEventSource::channel(1);
        tx.send(Err(TransportError::Closed)).await.unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result = EventPump::new(source, bus, store).run(shutdown_rx).await;
        assert_eq!(result, Err(TransportError::Closed));
    }
}
