//! Integration tests for offer and update acquisition.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fleet_events::{resource_names, Event, Offer, Resource, TaskState, TaskStatus};
use fleet_id::{AgentId, OfferId, TaskId};
use fleet_scheduler::acquire::{AcquireError, Acquirer, FirstMatch, ResourceRequest};
use fleet_scheduler::bus::EventBus;

fn offer(id: &str, names: &[&str]) -> Offer {
    Offer {
        id: OfferId::parse(id).unwrap(),
        agent_id: AgentId::parse(&format!("agent-{id}")).unwrap(),
        hostname: format!("host-{id}"),
        resources: names.iter().map(|n| Resource::scalar(*n, 1.0)).collect(),
    }
}

/// Offer A exposes {cpus, mem}; offer B exposes {cpus, mem, disk}.
///
/// Claimed offers are never handed out twice, so each round gets fresh ids.
fn offers_event(round: usize) -> Event {
    Event::Offers {
        offers: vec![
            offer(&format!("A-{round}"), &[resource_names::CPUS, resource_names::MEM]),
            offer(
                &format!("B-{round}"),
                &[resource_names::CPUS, resource_names::MEM, resource_names::DISK],
            ),
        ],
    }
}

fn label(offer: &Offer) -> &str {
    offer.id.as_str().split('-').next().unwrap_or_default()
}

async fn wait_for_waiters(bus: &EventBus, count: usize) {
    while bus.waiter_count() < count {
        tokio::task::yield_now().await;
    }
}

async fn acquire_once(acquirer: &Acquirer, request: ResourceRequest, round: usize) -> Offer {
    let bus = acquirer.bus().clone();
    let handle = tokio::spawn({
        let acquirer = acquirer.clone();
        async move { acquirer.acquire_offer(&request, Some(Duration::from_secs(5))).await }
    });

    wait_for_waiters(&bus, 1).await;
    bus.publish(offers_event(round)).await;
    handle.await.unwrap().unwrap()
}

#[tokio::test]
async fn test_only_full_match_is_selected() {
    let acquirer = Acquirer::new(EventBus::default());
    let request = ResourceRequest::sized(1.0, 1.0, 1.0, 0);

    for round in 0..10 {
        let chosen = acquire_once(&acquirer, request.clone(), round).await;
        assert_eq!(label(&chosen), "B");
    }
    assert_eq!(acquirer.bus().waiter_count(), 0);
}

#[tokio::test]
async fn test_random_selection_stays_within_matches() {
    let acquirer = Acquirer::new(EventBus::default());
    let request = ResourceRequest::sized(1.0, 0.0, 0.0, 0);

    let mut seen = HashSet::new();
    for round in 0..64 {
        let chosen = acquire_once(&acquirer, request.clone(), round).await;
        assert!(["A", "B"].contains(&label(&chosen)));
        seen.insert(label(&chosen).to_string());
    }
    // 64 uniform draws between two offers land on both with overwhelming odds.
    assert_eq!(seen.len(), 2);
}

#[tokio::test]
async fn test_injected_selector_is_deterministic() {
    let acquirer = Acquirer::new(EventBus::default()).with_selector(Arc::new(FirstMatch));
    let request = ResourceRequest::sized(1.0, 0.0, 0.0, 0);

    let chosen = acquire_once(&acquirer, request, 0).await;
    assert_eq!(chosen.id.as_str(), "A-0");
}

#[tokio::test]
async fn test_concurrent_acquisitions_get_distinct_offers() {
    let bus = EventBus::default();
    let acquirer = Acquirer::new(bus.clone()).with_selector(Arc::new(FirstMatch));
    let request = ResourceRequest::sized(1.0, 0.0, 0.0, 0);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let acquirer = acquirer.clone();
            let request = request.clone();
            tokio::spawn(async move {
                acquirer
                    .acquire_offer(&request, Some(Duration::from_secs(5)))
                    .await
            })
        })
        .collect();
    wait_for_waiters(&bus, 2).await;

    // One event, two matching offers: both launches are served from it.
    assert_eq!(bus.publish(offers_event(0)).await.delivered, 2);

    let mut got = Vec::new();
    for handle in handles {
        got.push(handle.await.unwrap().unwrap().id.to_string());
    }
    got.sort();
    assert_eq!(got, vec!["A-0", "B-0"]);
    assert_eq!(bus.waiter_count(), 0);
}

#[tokio::test]
async fn test_fully_claimed_event_keeps_waiting() {
    let bus = EventBus::default();
    let acquirer = Acquirer::new(bus.clone());
    let request = ResourceRequest::sized(1.0, 1.0, 1.0, 0);

    // B-0 is the only full match and the first acquisition takes it.
    let first = acquire_once(&acquirer, request.clone(), 0).await;
    assert_eq!(first.id.as_str(), "B-0");

    let handle = tokio::spawn({
        let acquirer = acquirer.clone();
        async move { acquirer.acquire_offer(&request, Some(Duration::from_secs(5))).await }
    });
    wait_for_waiters(&bus, 1).await;

    // Redelivering the same offers does not hand B-0 out again.
    assert_eq!(bus.publish(offers_event(0)).await.delivered, 1);
    tokio::task::yield_now().await;
    assert!(!handle.is_finished());
    assert_eq!(bus.waiter_count(), 1);

    bus.publish(offers_event(1)).await;
    assert_eq!(handle.await.unwrap().unwrap().id.as_str(), "B-1");
}

#[tokio::test]
async fn test_non_matching_offers_are_ignored() {
    let bus = EventBus::default();
    let acquirer = Acquirer::new(bus.clone());
    let request = ResourceRequest::sized(0.0, 0.0, 0.0, 2);

    let handle = tokio::spawn({
        let acquirer = acquirer.clone();
        async move { acquirer.acquire_offer(&request, None).await }
    });
    wait_for_waiters(&bus, 1).await;

    // No ports on either offer: nothing is delivered.
    assert_eq!(bus.publish(offers_event(0)).await.matched, 0);

    let mut with_ports = offer("C", &[]);
    with_ports.resources.push(Resource::ranges(
        resource_names::PORTS,
        vec![fleet_events::ValueRange {
            begin: 31000,
            end: 31001,
        }],
    ));
    assert_eq!(
        bus.publish(Event::Offers {
            offers: vec![with_ports]
        })
        .await
        .matched,
        1
    );

    assert_eq!(handle.await.unwrap().unwrap().id.as_str(), "C");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_evicts_waiter() {
    let bus = EventBus::default();
    let acquirer = Acquirer::new(bus.clone());
    let task = TaskId::parse("0.web.ops.local").unwrap();

    let err = acquirer
        .acquire_update(&task, Some(Duration::from_secs(3)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AcquireError::TimedOut {
            waiting_for: "update of task 0.web.ops.local".to_string(),
            after: Duration::from_secs(3),
        }
    );
    assert_eq!(bus.waiter_count(), 0);

    // A late update reaches nobody.
    let report = bus
        .publish(Event::Update {
            status: TaskStatus::new(task, TaskState::Running),
        })
        .await;
    assert_eq!(report.matched, 0);
}

#[tokio::test]
async fn test_cancelled_acquisition_does_not_leak() {
    let bus = EventBus::default();
    let acquirer = Acquirer::new(bus.clone());
    let request = ResourceRequest::sized(1.0, 0.0, 0.0, 0);

    let handle = tokio::spawn({
        let acquirer = acquirer.clone();
        async move { acquirer.acquire_offer(&request, None).await }
    });
    wait_for_waiters(&bus, 1).await;

    handle.abort();
    let _ = handle.await;
    assert_eq!(bus.waiter_count(), 0);
}
