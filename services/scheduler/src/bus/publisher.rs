//! Publisher side of the event bus: waiter registry and fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use fleet_events::{Event, EventKind};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::waiter::{Waiter, WaiterId};

/// Predicate deciding whether a waiter wants an event.
pub type Topic = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

// =============================================================================
// Configuration
// =============================================================================

/// Event bus tuning.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum time one delivery may wait for mailbox space.
    /// Zero means wait indefinitely.
    pub delivery_timeout: Duration,

    /// Capacity of each waiter's mailbox.
    pub mailbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
            mailbox_capacity: 1024,
        }
    }
}

// =============================================================================
// Publish Report
// =============================================================================

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Waiters whose topic accepted the event.
    pub matched: usize,
    /// Deliveries that reached a mailbox.
    pub delivered: usize,
    /// Deliveries abandoned after the delivery timeout.
    pub dropped: usize,
    /// Waiters that went away while the event was in flight.
    pub closed: usize,
}

enum Delivery {
    Delivered,
    Dropped,
    Closed,
}

// =============================================================================
// Registry
// =============================================================================

struct Slot {
    topic: Option<Topic>,
    tx: mpsc::Sender<Arc<Event>>,
}

impl Slot {
    fn accepts(&self, event: &Event) -> bool {
        self.topic.as_ref().is_none_or(|topic| topic(event))
    }
}

pub(super) struct Inner {
    config: BusConfig,
    waiters: RwLock<HashMap<WaiterId, Slot>>,
    next_id: AtomicU64,
}

impl Inner {
    // Lock sections never panic, so a poisoned lock still guards a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<WaiterId, Slot>> {
        self.waiters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<WaiterId, Slot>> {
        self.waiters.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deregisters a waiter. Dropping its sender closes the mailbox.
    pub(super) fn remove(&self, id: WaiterId) -> bool {
        let removed = self.write().remove(&id).is_some();
        if removed {
            trace!(waiter_id = %id, "Evicted waiter");
        }
        removed
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Process-wide fan-out router for manager events.
///
/// Cheap to clone; clones share the same waiter registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

impl EventBus {
    /// Create a new bus with no waiters.
    pub fn new(config: BusConfig) -> Self {
        let config = BusConfig {
            mailbox_capacity: config.mailbox_capacity.max(1),
            ..config
        };

        Self {
            inner: Arc::new(Inner {
                config,
                waiters: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Register a waiter. A `None` topic accepts every event.
    ///
    /// The waiter is registered when this returns, so any event published
    /// afterwards is delivered to it if the topic accepts it.
    pub fn subscribe(&self, topic: Option<Topic>) -> Waiter {
        let id = WaiterId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.config.mailbox_capacity);

        self.inner.write().insert(id, Slot { topic, tx });
        trace!(waiter_id = %id, "Registered waiter");

        Waiter::new(id, rx, Arc::downgrade(&self.inner))
    }

    /// Register a waiter filtered by `predicate`.
    pub fn subscribe_to<F>(&self, predicate: F) -> Waiter
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.subscribe(Some(Arc::new(predicate)))
    }

    /// Register a waiter that receives every event.
    pub fn subscribe_all(&self) -> Waiter {
        self.subscribe(None)
    }

    /// Deregister a waiter and close its mailbox.
    ///
    /// Returns `false` if the waiter was already gone; calling this more than
    /// once is harmless.
    pub fn evict(&self, id: WaiterId) -> bool {
        self.inner.remove(id)
    }

    /// Number of registered waiters.
    pub fn waiter_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Number of registered waiters whose topic accepts `event`.
    pub fn matching_waiters(&self, event: &Event) -> usize {
        self.inner
            .read()
            .values()
            .filter(|slot| slot.accepts(event))
            .count()
    }

    /// Deliver `event` to every waiter whose topic accepts it.
    ///
    /// Never fails: a waiter whose mailbox stays full past the delivery
    /// timeout misses this event and the drop is logged.
    pub async fn publish(&self, event: Event) -> PublishReport {
        let kind = event.kind();
        let event = Arc::new(event);

        // Snapshot matching senders so no lock is held while deliveries wait.
        let targets: Vec<(WaiterId, mpsc::Sender<Arc<Event>>)> = self
            .inner
            .read()
            .iter()
            .filter(|(_, slot)| slot.accepts(&event))
            .map(|(id, slot)| (*id, slot.tx.clone()))
            .collect();

        let mut report = PublishReport {
            matched: targets.len(),
            ..PublishReport::default()
        };

        if targets.is_empty() {
            trace!(event_kind = %kind, "No waiter interested in event");
            return report;
        }

        let timeout = self.inner.config.delivery_timeout;
        let deliveries = targets.into_iter().map(|(id, tx)| {
            let event = Arc::clone(&event);
            async move { deliver(id, tx, event, kind, timeout).await }
        });

        for outcome in join_all(deliveries).await {
            match outcome {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => report.dropped += 1,
                Delivery::Closed => report.closed += 1,
            }
        }

        debug!(
            event_kind = %kind,
            matched = report.matched,
            delivered = report.delivered,
            dropped = report.dropped,
            "Published event"
        );

        report
    }
}

async fn deliver(
    id: WaiterId,
    tx: mpsc::Sender<Arc<Event>>,
    event: Arc<Event>,
    kind: EventKind,
    timeout: Duration,
) -> Delivery {
    if timeout.is_zero() {
        return match tx.send(event).await {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        };
    }

    match tokio::time::timeout(timeout, tx.send(event)).await {
        Ok(Ok(())) => Delivery::Delivered,
        Ok(Err(_)) => {
            trace!(waiter_id = %id, event_kind = %kind, "Waiter gone before delivery");
            Delivery::Closed
        }
        Err(_) => {
            warn!(
                waiter_id = %id,
                event_kind = %kind,
                timeout_ms = timeout.as_millis() as u64,
                "Mailbox full, dropped event for waiter"
            );
            Delivery::Dropped
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
