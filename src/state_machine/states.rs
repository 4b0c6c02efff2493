use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements `as_str`, `Display` and `FromStr` over the persisted status names
macro_rules! status_names {
    ($ty:ident, $label:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {} status: {s}", $label)),
                }
            }
        }
    };
}

/// Workflow job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowJobStatus {
    /// Submitted, instance not started
    Prep,
    Running,
    Suspended,
    Succeeded,
    Killed,
    Failed,
}

status_names!(WorkflowJobStatus, "workflow job", {
    Prep => "PREP",
    Running => "RUNNING",
    Suspended => "SUSPENDED",
    Succeeded => "SUCCEEDED",
    Killed => "KILLED",
    Failed => "FAILED",
});

impl WorkflowJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Killed | Self::Failed)
    }

    /// RUNNING or SUSPENDED; anything else ends the job's active life
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        use WorkflowJobStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Prep, Running | Killed | Failed) => true,
            (Running, Suspended | Succeeded | Killed | Failed) => true,
            (Suspended, Running | Killed | Failed) => true,
            _ => false,
        }
    }
}

/// Workflow action status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowActionStatus {
    Prep,
    Running,
    /// Executor finished; end processing outstanding
    Done,
    Ok,
    Error,
    /// Transient start failure, start re-queued with delay
    StartRetry,
    /// Start failed permanently, waiting for manual intervention
    StartManual,
    Killed,
    Failed,
}

status_names!(WorkflowActionStatus, "workflow action", {
    Prep => "PREP",
    Running => "RUNNING",
    Done => "DONE",
    Ok => "OK",
    Error => "ERROR",
    StartRetry => "START_RETRY",
    StartManual => "START_MANUAL",
    Killed => "KILLED",
    Failed => "FAILED",
});

impl WorkflowActionStatus {
    /// Final action outcome known; the instance may be signalled
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Ok | Self::Error | Self::Killed | Self::Failed)
    }

    /// States from which `ActionStart` may run
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Prep | Self::StartRetry | Self::StartManual)
    }
}

/// Coordinator job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinatorJobStatus {
    #[serde(rename = "PREP")]
    Prep,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "RUNNINGWITHERROR")]
    RunningWithError,
    #[serde(rename = "PREPSUSPENDED")]
    PrepSuspended,
    #[serde(rename = "SUSPENDED")]
    Suspended,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "DONEWITHERROR")]
    DoneWithError,
    #[serde(rename = "KILLED")]
    Killed,
    #[serde(rename = "FAILED")]
    Failed,
}

status_names!(CoordinatorJobStatus, "coordinator job", {
    Prep => "PREP",
    Running => "RUNNING",
    RunningWithError => "RUNNINGWITHERROR",
    PrepSuspended => "PREPSUSPENDED",
    Suspended => "SUSPENDED",
    Paused => "PAUSED",
    Succeeded => "SUCCEEDED",
    DoneWithError => "DONEWITHERROR",
    Killed => "KILLED",
    Failed => "FAILED",
});

impl CoordinatorJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::DoneWithError | Self::Killed | Self::Failed
        )
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended | Self::PrepSuspended)
    }

    /// States in which new actions are materialized
    pub fn is_materializable(&self) -> bool {
        matches!(self, Self::Prep | Self::Running | Self::RunningWithError)
    }
}

/// Coordinator action status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorActionStatus {
    /// Materialized, input dependencies outstanding
    Waiting,
    /// Inputs available, waiting for a concurrency slot
    Ready,
    /// Child workflow created
    Submitted,
    Running,
    Suspended,
    /// Inputs never became available within the action timeout
    #[serde(rename = "TIMEDOUT")]
    TimedOut,
    Succeeded,
    Killed,
    Failed,
    /// Superseded under LAST_ONLY execution
    Skipped,
}

status_names!(CoordinatorActionStatus, "coordinator action", {
    Waiting => "WAITING",
    Ready => "READY",
    Submitted => "SUBMITTED",
    Running => "RUNNING",
    Suspended => "SUSPENDED",
    TimedOut => "TIMEDOUT",
    Succeeded => "SUCCEEDED",
    Killed => "KILLED",
    Failed => "FAILED",
    Skipped => "SKIPPED",
});

impl CoordinatorActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::Succeeded | Self::Killed | Self::Failed | Self::Skipped
        )
    }

    /// Counts against the coordinator's concurrency limit
    pub fn occupies_slot(&self) -> bool {
        matches!(self, Self::Submitted | Self::Running | Self::Suspended)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Killed | Self::Failed)
    }
}

/// Bundle job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleJobStatus {
    #[serde(rename = "PREP")]
    Prep,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "RUNNINGWITHERROR")]
    RunningWithError,
    #[serde(rename = "PREPSUSPENDED")]
    PrepSuspended,
    #[serde(rename = "SUSPENDED")]
    Suspended,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "DONEWITHERROR")]
    DoneWithError,
    #[serde(rename = "KILLED")]
    Killed,
    #[serde(rename = "FAILED")]
    Failed,
}

status_names!(BundleJobStatus, "bundle job", {
    Prep => "PREP",
    Running => "RUNNING",
    RunningWithError => "RUNNINGWITHERROR",
    PrepSuspended => "PREPSUSPENDED",
    Suspended => "SUSPENDED",
    Succeeded => "SUCCEEDED",
    DoneWithError => "DONEWITHERROR",
    Killed => "KILLED",
    Failed => "FAILED",
});

impl BundleJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::DoneWithError | Self::Killed | Self::Failed
        )
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended | Self::PrepSuspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_terminal_check() {
        assert!(WorkflowJobStatus::Succeeded.is_terminal());
        assert!(WorkflowJobStatus::Killed.is_terminal());
        assert!(!WorkflowJobStatus::Suspended.is_terminal());
        assert!(WorkflowJobStatus::Suspended.is_active());
        assert!(!WorkflowJobStatus::Prep.is_active());
    }

    #[test]
    fn test_workflow_transitions_are_monotonic() {
        for terminal in [
            WorkflowJobStatus::Succeeded,
            WorkflowJobStatus::Killed,
            WorkflowJobStatus::Failed,
        ] {
            for next in WorkflowJobStatus::ALL {
                if *next != terminal {
                    assert!(!terminal.can_transition_to(*next), "{terminal} -> {next}");
                }
            }
        }
        assert!(WorkflowJobStatus::Running.can_transition_to(WorkflowJobStatus::Suspended));
        assert!(WorkflowJobStatus::Suspended.can_transition_to(WorkflowJobStatus::Running));
        assert!(!WorkflowJobStatus::Prep.can_transition_to(WorkflowJobStatus::Succeeded));
    }

    #[test]
    fn test_action_completion() {
        assert!(WorkflowActionStatus::Ok.is_complete());
        assert!(WorkflowActionStatus::Error.is_complete());
        assert!(!WorkflowActionStatus::Done.is_complete());
        assert!(WorkflowActionStatus::StartRetry.is_startable());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(CoordinatorJobStatus::RunningWithError.to_string(), "RUNNINGWITHERROR");
        assert_eq!(
            "DONEWITHERROR".parse::<BundleJobStatus>().unwrap(),
            BundleJobStatus::DoneWithError
        );
        assert_eq!(
            "START_RETRY".parse::<WorkflowActionStatus>().unwrap(),
            WorkflowActionStatus::StartRetry
        );
        assert!("running".parse::<WorkflowJobStatus>().is_err());
    }

    #[test]
    fn test_state_serde() {
        for status in CoordinatorJobStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
        for status in CoordinatorActionStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
        let parsed: WorkflowActionStatus = serde_json::from_str("\"START_MANUAL\"").unwrap();
        assert_eq!(parsed, WorkflowActionStatus::StartManual);
    }
}
