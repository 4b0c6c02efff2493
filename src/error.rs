//! Error types for the job engine.
//!
//! Commands fail with a [`CommandError`] carrying a stable [`ErrorCode`]. Lower layers
//! (store, workflow instance, configuration) have their own error enums that are folded
//! into `CommandError` at the command boundary and into [`JobflowError`] at the engine
//! boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::instance::WorkflowError;
use crate::store::StoreError;

/// Stable error codes surfaced on failed commands and persisted on failed jobs/actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Entity store operation failed
    E0603,
    /// Job does not exist
    E0604,
    /// Action does not exist
    E0605,
    /// Command executed before its state was loaded
    E0607,
    /// Required service is not available
    E0610,
    /// Workflow instance failure
    E0720,
    /// Kill node message could not be resolved
    E0729,
    /// Workflow cannot be started from its current state
    E0801,
    /// No executor registered for an action type
    E0802,
    /// Action executor failed
    E0803,
    /// Job must be RUNNING or PREP
    E0813,
    /// Action already processed for a signal
    E0814,
    /// Action is not in a startable state
    E0815,
    /// Expression evaluation failed
    E1004,
    /// SLA registration failed
    E1007,
    /// Invalid status transition
    E1010,
    /// Invalid coordinator change request
    E1012,
    /// Entity lock could not be acquired in time
    E1013,
    /// Command queue rejected the command
    E1014,
    /// Bundle operation failed
    E1020,
}

impl ErrorCode {
    /// Short description of the error class
    pub fn description(&self) -> &'static str {
        match self {
            Self::E0603 => "entity store error",
            Self::E0604 => "job does not exist",
            Self::E0605 => "action does not exist",
            Self::E0607 => "command state not loaded",
            Self::E0610 => "required service not available",
            Self::E0720 => "workflow instance error",
            Self::E0729 => "kill node message",
            Self::E0801 => "workflow cannot be started",
            Self::E0802 => "invalid action type",
            Self::E0803 => "action executor error",
            Self::E0813 => "job must be in RUNNING or PREP state",
            Self::E0814 => "action already processed",
            Self::E0815 => "action not startable",
            Self::E1004 => "expression evaluation error",
            Self::E1007 => "SLA registration failed",
            Self::E1010 => "invalid status transition",
            Self::E1012 => "invalid coordinator change",
            Self::E1013 => "entity lock timeout",
            Self::E1014 => "command queue full",
            Self::E1020 => "bundle error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Failure of a single command invocation.
///
/// `retryable` errors are re-queued by the executor with backoff; all others are logged
/// as failed immediately.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: true,
        }
    }

    /// Error raised when `execute` runs without a successful `load_state`
    pub fn not_loaded(what: &str) -> Self {
        Self::new(ErrorCode::E0607, format!("{what} not loaded"))
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { kind, id } if kind.is_action() => {
                Self::new(ErrorCode::E0605, format!("{kind} [{id}]"))
            }
            StoreError::NotFound { kind, id } => Self::new(ErrorCode::E0604, format!("{kind} [{id}]")),
            StoreError::Unavailable(_) => Self::retryable(ErrorCode::E0603, err.to_string()),
            _ => Self::new(ErrorCode::E0603, err.to_string()),
        }
    }
}

impl From<WorkflowError> for CommandError {
    fn from(err: WorkflowError) -> Self {
        Self::new(ErrorCode::E0720, err.to_string())
    }
}

/// Crate-level error returned by engines, services and bootstrap.
#[derive(Debug, Error)]
pub enum JobflowError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, JobflowError>;
