//! # Command Outcome Classification
//!
//! Every pass of a command through the executor pipeline reduces to one of three
//! outcomes, which drive stats tracking, retry and logging:
//! - **Completed**: batch committed, follow-ups queued
//! - **Deferred**: precondition not met, command dropped without retry
//! - **Failed**: load, execute or commit failed with a [`CommandError`]

use crate::error::{CommandError, ErrorCode};
use crate::execution::command::Precondition;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Completed,
    Deferred(String),
    Failed(CommandError),
}

impl CommandOutcome {
    /// Classify a precondition check; `None` means the pipeline continues
    pub fn from_precondition(precondition: Precondition) -> Option<Self> {
        match precondition {
            Precondition::Ready => None,
            Precondition::Deferred(reason) => Some(Self::Deferred(reason)),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether the executor may run the command again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(err) if err.retryable)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Failed(err) => Some(err.code),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Deferred(_) => "deferred",
            Self::Failed(_) => "failed",
        }
    }
}

impl From<CommandError> for CommandOutcome {
    fn from(err: CommandError) -> Self {
        Self::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_precondition_continues_pipeline() {
        assert_eq!(CommandOutcome::from_precondition(Precondition::Ready), None);
    }

    #[test]
    fn test_deferred_precondition_is_not_a_failure() {
        let outcome =
            CommandOutcome::from_precondition(Precondition::deferred("job is SUSPENDED")).unwrap();
        assert!(outcome.is_deferred());
        assert!(!outcome.is_failure());
        assert!(!outcome.is_retryable());
        assert_eq!(outcome.label(), "deferred");
    }

    #[test]
    fn test_failed_outcome_exposes_code_and_retryability() {
        let outcome: CommandOutcome =
            CommandError::retryable(ErrorCode::E0603, "store unavailable").into();
        assert!(outcome.is_failure());
        assert!(outcome.is_retryable());
        assert_eq!(outcome.error_code(), Some(ErrorCode::E0603));

        let fatal: CommandOutcome = CommandError::new(ErrorCode::E0801, "not PREP").into();
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.label(), "failed");
    }
}
