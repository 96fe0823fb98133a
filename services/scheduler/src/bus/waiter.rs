//! Subscriber side of the event bus.

use std::fmt;
use std::sync::{Arc, Weak};

use fleet_events::Event;
use tokio::sync::mpsc;

use super::publisher::Inner;

/// Identity of a registered waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaiterId(u64);

impl WaiterId {
    pub(super) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter-{}", self.0)
    }
}

/// A registered subscriber and its private mailbox.
///
/// Dropping the waiter evicts it from the bus, so a caller that gives up
/// (timeout, cancelled task) never leaves a stale registration behind.
pub struct Waiter {
    id: WaiterId,
    rx: mpsc::Receiver<Arc<Event>>,
    bus: Weak<Inner>,
}

impl Waiter {
    pub(super) fn new(id: WaiterId, rx: mpsc::Receiver<Arc<Event>>, bus: Weak<Inner>) -> Self {
        Self { id, rx, bus }
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Wait for the next accepted event.
    ///
    /// Returns `None` once the waiter has been evicted and its mailbox drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").field("id", &self.id).finish()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
