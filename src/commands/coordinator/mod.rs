//! # Coordinator Commands
//!
//! A coordinator job materializes one action per nominal time between its start and end
//! time. Each action waits for its input dependencies, queues for a concurrency slot,
//! then runs as a child workflow whose completion is reported back through
//! [`CoordActionUpdateCommand`]. Every coordinator command serializes on the
//! coordinator job id, including the ones addressed to a single action.

pub mod action;
pub mod control;
pub mod input_check;
pub mod materialize;
pub mod status;
pub mod submit;

pub use action::{CoordActionStartCommand, CoordActionUpdateCommand};
pub use control::{CoordChange, CoordChangeCommand, CoordKillCommand, CoordResumeCommand, CoordSuspendCommand};
pub use input_check::{CoordActionInputCheckCommand, CoordActionReadyCommand};
pub use materialize::{CoordMaterializeCommand, MaterializationTrigger};
pub use status::CoordStatusTransitCommand;
pub use submit::CoordSubmitCommand;

use crate::constants::parent_of;

/// Coordinator job id of a coordinator action id
pub(crate) fn job_of(action_id: &str) -> String {
    parent_of(action_id).unwrap_or(action_id).to_string()
}
