//! # fleet-id
//!
//! Typed identifiers for the fleet scheduler.
//!
//! ## Design Principles
//!
//! - Manager-issued IDs (offers, agents, frameworks) are opaque strings; we
//!   never try to interpret them, only carry them back verbatim
//! - Scheduler-issued IDs (apps, tasks) follow a dotted naming scheme so that
//!   they are readable in manager UIs
//! - IDs are typed to prevent mixing different resource types
//!
//! ## ID Format
//!
//! - App: `{app_name}.{run_as}.{cluster}`, e.g. `web.ops.prod-east`
//! - Task: `{instance_index}.{app_id}`, e.g. `0.web.ops.prod-east`
//! - Offer / Agent / Framework: whatever the manager hands us
//!
//! All IDs reject empty strings, whitespace, and control characters, and are
//! capped at [`MAX_ID_LEN`] bytes.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Maximum accepted length of any identifier, in bytes.
pub const MAX_ID_LEN: usize = 255;

/// Validates the characters and length shared by every ID type.
pub fn validate(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }

    if s.len() > MAX_ID_LEN {
        return Err(IdError::TooLong {
            kind,
            max: MAX_ID_LEN,
            actual: s.len(),
        });
    }

    if let Some(ch) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::InvalidCharacter { kind, ch });
    }

    Ok(())
}
