//! Workflow job and workflow action commands.

pub mod action;
pub mod control;
pub mod notification;
pub mod rerun;
pub mod signal;
pub mod submit;

pub use action::{ActionEndCommand, ActionKillCommand, ActionStartCommand};
pub use control::{KillCommand, ResumeCommand, SuspendCommand};
pub use notification::{Notification, NotificationCommand, WorkflowEndCommand};
pub use rerun::ReRunCommand;
pub use signal::SignalCommand;
pub use submit::SubmitCommand;
