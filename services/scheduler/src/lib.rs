//! fleet Scheduler Library
//!
//! A framework scheduler that launches and supervises containerized
//! application instances on a resource-offer cluster manager.
//!
//! ## Architecture
//!
//! ```text
//! EventSource ─► EventPump ─► EventBus ─┬─► Acquirer::acquire_offer   (OFFERS)
//!                                        └─► TaskWatch::next           (UPDATE for one task)
//!                                                    │
//!   AppLauncher ─► TaskCaller ─► ManagerTransport ◄──┘  (ACCEPT / KILL / ACKNOWLEDGE)
//! ```
//!
//! ## Modules
//!
//! - `bus`: fan-out of manager events to per-caller mailboxes
//! - `acquire`: blocking-style "next matching offer / update" on top of the bus
//! - `task`: task descriptor builder and the call-and-acknowledge protocol
//! - `app`: app definitions, records and instance-by-instance launching
//! - `store`: app and task persistence
//! - `transport`: manager connection seams and the simulated manager
//! - `pump`: the single reader that feeds the bus

pub mod acquire;
pub mod app;
pub mod bus;
pub mod config;
pub mod logging;
pub mod pump;
pub mod store;
pub mod task;
pub mod transport;

// Re-export commonly used types
pub use acquire::{AcquireError, Acquirer, FirstMatch, OfferSelector, RandomSelector, ResourceRequest};
pub use app::{App, AppLauncher, AppState, AppVersion, LaunchError};
pub use bus::{BusConfig, EventBus, PublishReport, Waiter};
pub use pump::{EventPump, PumpStats};
pub use store::{MemoryStore, Store, StoreError};
pub use task::{TaskCaller, TaskError, TaskFailure};
pub use transport::{ManagerTransport, RecordingTransport, SimulatedManager, TransportError};
