//! # fleet-events
//!
//! The message vocabulary spoken between the fleet scheduler and the cluster
//! manager.
//!
//! ## Design Principles
//!
//! - Messages arrive already decoded; this crate only defines their shape
//! - Events are a closed sum type so subscribers pattern-match on the tag
//!   instead of downcasting untyped payloads
//! - Events are immutable once published and are shared read-only
//!
//! ## Directions
//!
//! - [`Event`]: manager → scheduler (`SUBSCRIBED`, `OFFERS`, `UPDATE`, ...)
//! - [`Call`]: scheduler → manager (`ACCEPT`, `KILL`, `ACKNOWLEDGE`, ...)
//!
//! ## Resources
//!
//! Offers and task descriptors share the [`Resource`] model: named scalar
//! (`cpus`, `mem`, `disk`), range (`ports`) or set values.

mod call;
mod error;
mod event;
mod types;

pub use call::*;
pub use error::EventError;
pub use event::*;
pub use types::*;
