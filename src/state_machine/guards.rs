//! Transition guards applied by commands before mutating a status field.

use crate::error::{CommandError, ErrorCode};

use super::states::{
    BundleJobStatus, CoordinatorActionStatus, CoordinatorJobStatus, WorkflowJobStatus,
};

/// Guard for workflow job status changes
pub fn workflow_transition(
    job_id: &str,
    from: WorkflowJobStatus,
    to: WorkflowJobStatus,
) -> Result<(), CommandError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(invalid(job_id, from, to))
    }
}

/// Re-run is the one sanctioned way out of a terminal workflow status
pub fn workflow_rerun(job_id: &str, from: WorkflowJobStatus) -> Result<(), CommandError> {
    if from.is_terminal() {
        Ok(())
    } else {
        Err(invalid(job_id, from, WorkflowJobStatus::Prep))
    }
}

/// Terminal coordinator jobs accept no further status changes
pub fn coordinator_transition(
    job_id: &str,
    from: CoordinatorJobStatus,
    to: CoordinatorJobStatus,
) -> Result<(), CommandError> {
    if from == to || !from.is_terminal() {
        Ok(())
    } else {
        Err(invalid(job_id, from, to))
    }
}

pub fn coordinator_action_transition(
    action_id: &str,
    from: CoordinatorActionStatus,
    to: CoordinatorActionStatus,
) -> Result<(), CommandError> {
    if from == to || !from.is_terminal() {
        Ok(())
    } else {
        Err(invalid(action_id, from, to))
    }
}

pub fn bundle_transition(
    bundle_id: &str,
    from: BundleJobStatus,
    to: BundleJobStatus,
) -> Result<(), CommandError> {
    if from == to || !from.is_terminal() {
        Ok(())
    } else {
        Err(invalid(bundle_id, from, to))
    }
}

fn invalid(id: &str, from: impl std::fmt::Display, to: impl std::fmt::Display) -> CommandError {
    CommandError::new(
        ErrorCode::E1010,
        format!("[{id}] cannot move from {from} to {to}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_workflow_rejects_changes() {
        let err = workflow_transition(
            "wf-1",
            WorkflowJobStatus::Killed,
            WorkflowJobStatus::Running,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::E1010);
        assert!(workflow_rerun("wf-1", WorkflowJobStatus::Killed).is_ok());
        assert!(workflow_rerun("wf-1", WorkflowJobStatus::Running).is_err());
    }

    #[test]
    fn test_coordinator_action_terminal_is_final() {
        assert!(coordinator_action_transition(
            "c@1",
            CoordinatorActionStatus::Waiting,
            CoordinatorActionStatus::Ready
        )
        .is_ok());
        assert!(coordinator_action_transition(
            "c@1",
            CoordinatorActionStatus::Succeeded,
            CoordinatorActionStatus::Running
        )
        .is_err());
    }
}
