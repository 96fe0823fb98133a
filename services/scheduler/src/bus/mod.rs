//! Event bus that demultiplexes the manager's event stream.
//!
//! The manager pushes every event for this framework down one stream. The
//! bus turns that single stream into per-caller mailboxes: a caller that
//! needs "the next offer that fits" or "the next update for task X"
//! registers a [`Waiter`] with a topic predicate, then blocks on its own
//! mailbox.
//!
//! ```text
//! EventPump ──publish──► EventBus ──┬──► Waiter(offers that fit request A)
//!                          (fan-out)   ├──► Waiter(updates for task 0.web...)
//!                                      └──► Waiter(all events)
//! ```
//!
//! ## Rules
//!
//! - **Subscribe before publish**: a waiter sees every matching event published
//!   after `subscribe` returns, and nothing published before (no replay).
//! - **Concurrent fan-out**: deliveries for one event run concurrently and are
//!   joined before `publish` returns.
//! - **Bounded delivery**: each delivery waits at most `delivery_timeout` for
//!   mailbox space; on expiry the event is dropped for that waiter only.
//! - **Per-waiter ordering**: events reach a waiter in publish order.

mod publisher;
mod waiter;

pub use publisher::{BusConfig, EventBus, PublishReport, Topic};
pub use waiter::{Waiter, WaiterId};
