//! One-shot acquisition of offers and task updates from the event bus.
//!
//! Each acquisition registers its waiter *before* it starts waiting, then
//! blocks on its own mailbox. Nothing is replayed: an event published
//! before the waiter exists is never seen.
//!
//! Waits are unbounded unless a timeout is passed. On timeout the waiter is
//! evicted and [`AcquireError::TimedOut`] is returned.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fleet_events::{resource_names, Event, EventKind, Offer, TaskStatus};
use fleet_id::{OfferId, TaskId};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::bus::{EventBus, Waiter};

// =============================================================================
// Errors
// =============================================================================

/// Errors from offer/update acquisition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// Nothing matching arrived within the allotted time.
    #[error("timed out after {after:?} waiting for {waiting_for}")]
    TimedOut {
        waiting_for: String,
        after: Duration,
    },

    /// The waiter was evicted (or the bus dropped) while waiting.
    #[error("mailbox closed while waiting for {waiting_for}")]
    MailboxClosed { waiting_for: String },
}

// =============================================================================
// Resource Request
// =============================================================================

/// One resource a task needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    /// A scalar amount of a named resource (`cpus`, `mem`, `disk`).
    Scalar { name: String, amount: f64 },
    /// A number of host ports.
    Ports { count: usize },
}

impl Requirement {
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar { name, .. } => name,
            Self::Ports { .. } => resource_names::PORTS,
        }
    }
}

/// Ordered set of requirements describing one task's needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceRequest {
    requirements: Vec<Requirement>,
}

impl ResourceRequest {
    pub fn new(requirements: Vec<Requirement>) -> Self {
        Self { requirements }
    }

    /// Builds a request from the usual task sizing. Zero amounts are omitted.
    pub fn sized(cpus: f64, mem: f64, disk: f64, ports: usize) -> Self {
        let mut requirements = Vec::new();
        for (name, amount) in [
            (resource_names::CPUS, cpus),
            (resource_names::MEM, mem),
            (resource_names::DISK, disk),
        ] {
            if amount > 0.0 {
                requirements.push(Requirement::Scalar {
                    name: name.to_string(),
                    amount,
                });
            }
        }
        if ports > 0 {
            requirements.push(Requirement::Ports { count: ports });
        }
        Self { requirements }
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether `offer` exposes every requested resource.
    ///
    /// Only resource names are compared; offered quantities are not checked
    /// against requested amounts.
    pub fn matches(&self, offer: &Offer) -> bool {
        self.requirements
            .iter()
            .all(|req| offer.has_resource(req.name()))
    }

    /// Indices of the offers in `offers` that match, in offer order.
    pub fn matching_indices(&self, offers: &[Offer]) -> Vec<usize> {
        offers
            .iter()
            .enumerate()
            .filter(|(_, offer)| self.matches(offer))
            .map(|(i, _)| i)
            .collect()
    }
}

// =============================================================================
// Offer Selection
// =============================================================================

/// Picks one of several matching offers.
pub trait OfferSelector: Send + Sync {
    /// Returns a position in `0..count`. `count` is never zero.
    fn pick(&self, count: usize) -> usize;
}

/// Uniformly random choice among matching offers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl OfferSelector for RandomSelector {
    fn pick(&self, count: usize) -> usize {
        rand::rng().random_range(0..count)
    }
}

/// Always the first matching offer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstMatch;

impl OfferSelector for FirstMatch {
    fn pick(&self, _count: usize) -> usize {
        0
    }
}

// =============================================================================
// Task Watch
// =============================================================================

/// A registered subscription to one task's `UPDATE` events.
///
/// Obtained from [`Acquirer::watch_task`] *before* the call that triggers
/// updates is sent, so the first update cannot slip past.
pub struct TaskWatch {
    task_id: TaskId,
    waiter: Waiter,
}

impl TaskWatch {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Wait for the next update of the watched task.
    pub async fn next(&mut self, timeout: Option<Duration>) -> Result<TaskStatus, AcquireError> {
        let waiting_for = || format!("update of task {}", self.task_id);
        let event = wait_first(&mut self.waiter, timeout, &waiting_for).await?;

        event
            .task_status()
            .cloned()
            .ok_or_else(|| AcquireError::MailboxClosed {
                waiting_for: waiting_for(),
            })
    }
}

// =============================================================================
// Acquirer
// =============================================================================

/// Offers already handed out, remembered so concurrent acquisitions fed by
/// the same `OFFERS` event never get the same offer.
#[derive(Debug, Default)]
struct ClaimedOffers {
    ids: HashSet<OfferId>,
    order: VecDeque<OfferId>,
}

impl ClaimedOffers {
    /// Offer ids are never reused, so only recent claims can collide.
    const CAPACITY: usize = 4096;

    fn contains(&self, id: &OfferId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: OfferId) {
        if self.ids.insert(id.clone()) {
            self.order.push_back(id);
        }
        while self.order.len() > Self::CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// Blocking-style acquisition on top of the event bus.
///
/// Clones share one set of claimed offers: an offer is returned by at most
/// one `acquire_offer` call.
#[derive(Clone)]
pub struct Acquirer {
    bus: EventBus,
    selector: Arc<dyn OfferSelector>,
    claimed: Arc<Mutex<ClaimedOffers>>,
}

impl Acquirer {
    /// Create an acquirer with uniform-random offer selection.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            selector: Arc::new(RandomSelector),
            claimed: Arc::default(),
        }
    }

    /// Replace the offer selection strategy.
    pub fn with_selector(mut self, selector: Arc<dyn OfferSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Wait for an `OFFERS` event carrying an unclaimed offer that matches
    /// `request`, claim one of those offers and return it.
    ///
    /// An event whose matching offers were all claimed by other acquisitions
    /// is skipped and the wait goes on.
    #[instrument(level = "debug", skip(self, request), fields(requirements = request.requirements().len()))]
    pub async fn acquire_offer(
        &self,
        request: &ResourceRequest,
        timeout: Option<Duration>,
    ) -> Result<Offer, AcquireError> {
        let topic_request = request.clone();
        let mut waiter = self.bus.subscribe_to(move |ev: &Event| {
            ev.kind() == EventKind::Offers && topic_request.offers_match(ev.offers())
        });

        let search = self.next_unclaimed(&mut waiter, request);
        let result = match timeout {
            Some(after) => tokio::time::timeout(after, search)
                .await
                .unwrap_or_else(|_| {
                    Err(AcquireError::TimedOut {
                        waiting_for: "matching offer".to_string(),
                        after,
                    })
                }),
            None => search.await,
        };
        self.bus.evict(waiter.id());
        result
    }

    async fn next_unclaimed(&self, waiter: &mut Waiter, request: &ResourceRequest) -> Result<Offer, AcquireError> {
        loop {
            let event = wait_first(waiter, None, || "matching offer".to_string()).await?;
            if let Some(offer) = self.claim(request, event.offers()) {
                return Ok(offer);
            }
            debug!("Every matching offer already claimed, waiting for more");
        }
    }

    fn claim(&self, request: &ResourceRequest, offers: &[Offer]) -> Option<Offer> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);

        // Same pure predicate as the topic, minus offers already taken.
        let candidates: Vec<usize> = request
            .matching_indices(offers)
            .into_iter()
            .filter(|&i| !claimed.contains(&offers[i].id))
            .collect();
        let last = candidates.len().checked_sub(1)?;
        let offer = offers[candidates[self.selector.pick(candidates.len()).min(last)]].clone();
        claimed.insert(offer.id.clone());

        debug!(
            offer_id = %offer.id,
            agent_id = %offer.agent_id,
            candidates = candidates.len(),
            "Acquired offer"
        );
        Some(offer)
    }

    /// Register interest in `task_id`'s updates without waiting yet.
    pub fn watch_task(&self, task_id: &TaskId) -> TaskWatch {
        let topic_task = task_id.clone();
        let waiter = self
            .bus
            .subscribe_to(move |ev: &Event| ev.is_update_for(&topic_task));

        TaskWatch {
            task_id: task_id.clone(),
            waiter,
        }
    }

    /// Wait for the next `UPDATE` event for `task_id`.
    pub async fn acquire_update(
        &self,
        task_id: &TaskId,
        timeout: Option<Duration>,
    ) -> Result<TaskStatus, AcquireError> {
        let mut watch = self.watch_task(task_id);
        let status = watch.next(timeout).await;
        self.bus.evict(watch.waiter.id());
        status
    }
}

impl ResourceRequest {
    fn offers_match(&self, offers: &[Offer]) -> bool {
        offers.iter().any(|offer| self.matches(offer))
    }
}

async fn wait_first(
    waiter: &mut Waiter,
    timeout: Option<Duration>,
    waiting_for: impl Fn() -> String,
) -> Result<Arc<Event>, AcquireError> {
    let received = match timeout {
        Some(after) => tokio::time::timeout(after, waiter.recv())
            .await
            .map_err(|_| AcquireError::TimedOut {
                waiting_for: waiting_for(),
                after,
            })?,
        None => waiter.recv().await,
    };

    received.ok_or_else(|| AcquireError::MailboxClosed {
        waiting_for: waiting_for(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_events::{Resource, TaskState};
    use fleet_id::AgentId;

    fn offer(id: &str, names: &[&str]) -> Offer {
        Offer {
            id: OfferId::parse(id).unwrap(),
            agent_id: AgentId::parse("agent-1").unwrap(),
            hostname: "node-1".to_string(),
            resources: names.iter().map(|n| Resource::scalar(*n, 1.0)).collect(),
        }
    }

    #[test]
    fn test_sized_request_skips_zero_amounts() {
        let request = ResourceRequest::sized(0.5, 0.0, 10.0, 2);
        let names: Vec<_> = request.requirements().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["cpus", "disk", "ports"]);
    }

    #[test]
    fn test_matching_ignores_quantities() {
        let request = ResourceRequest::sized(64.0, 0.0, 0.0, 0);
        // The offer only has 1 cpu, but the name is present.
        assert!(request.matches(&offer("o1", &["cpus"])));
        assert!(!request.matches(&offer("o2", &["mem"])));
    }

    #[test]
    fn test_matching_indices_preserve_order() {
        let request = ResourceRequest::sized(1.0, 1.0, 0.0, 0);
        let offers = vec![
            offer("o1", &["cpus"]),
            offer("o2", &["cpus", "mem"]),
            offer("o3", &["mem", "cpus", "disk"]),
        ];
        assert_eq!(request.matching_indices(&offers), vec![1, 2]);
    }

    #[test]
    fn test_random_selector_stays_in_range() {
        for _ in 0..100 {
            assert!(RandomSelector.pick(3) < 3);
        }
        assert_eq!(FirstMatch.pick(5), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_offer_times_out_and_evicts() {
        let bus = EventBus::default();
        let acquirer = Acquirer::new(bus.clone());
        let request = ResourceRequest::sized(1.0, 0.0, 0.0, 0);

        let err = acquirer
            .acquire_offer(&request, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::TimedOut { .. }));
        assert_eq!(bus.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_update_skips_other_tasks() {
        let bus = EventBus::default();
        let acquirer = Acquirer::new(bus.clone());
        let mine = TaskId::parse("0.web.ops.local").unwrap();
        let theirs = TaskId::parse("1.web.ops.local").unwrap();

        let handle = tokio::spawn({
            let acquirer = acquirer.clone();
            let mine = mine.clone();
            async move { acquirer.acquire_update(&mine, None).await }
        });

        while bus.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        bus.publish(Event::Update {
            status: TaskStatus::new(theirs, TaskState::Failed),
        })
        .await;
        bus.publish(Event::Update {
            status: TaskStatus::new(mine.clone(), TaskState::Running),
        })
        .await;

        let status = handle.await.unwrap().unwrap();
        assert_eq!(status.task_id, mine);
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(bus.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_task_watch_sees_updates_in_order() {
        let bus = EventBus::default();
        let acquirer = Acquirer::new(bus.clone());
        let task = TaskId::parse("0.web.ops.local").unwrap();
        let mut watch = acquirer.watch_task(&task);

        for state in [TaskState::Staging, TaskState::Running] {
            bus.publish(Event::Update {
                status: TaskStatus::new(task.clone(), state),
            })
            .await;
        }

        assert_eq!(watch.next(None).await.unwrap().state, TaskState::Staging);
        assert_eq!(watch.next(None).await.unwrap().state, TaskState::Running);
        assert_eq!(watch.task_id(), &task);
    }
}
