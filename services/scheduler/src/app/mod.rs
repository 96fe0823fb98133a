//! Applications: definitions, records and launch orchestration.
//!
//! An app id is `{appName}.{runAs}.{cluster}`; instance `i` of an app runs as
//! task `{i}.{appId}`.

mod launcher;
mod model;

pub use launcher::{AppLauncher, LaunchError};
pub use model::{
    App, AppState, AppVersion, Container, Docker, Gateway, Parameter, PortMapping, TaskRecord,
    UpdatePolicy, Volume,
};
