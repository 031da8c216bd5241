//! Core types for observation data and monitor state.
//!
//! - [`Observation`] is the canonical form of one entry in a streams document,
//!   independent of the JSON schema version it was decoded from
//! - [`ObservationBatch`] pairs watched observations with consumer item references
//! - [`Mode`], [`Phase`] and [`MonitorStatus`] describe what a monitor is doing

mod batch;
mod observation;
mod status;

pub use batch::{ObservationBatch, Update};
pub use observation::{Category, ConditionLevel, Observation, ObservationValue};
pub use status::{Mode, MonitorStatus, Phase};
