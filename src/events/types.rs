use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{
    AppType, BundleJob, CoordinatorAction, CoordinatorJob, WorkflowAction, WorkflowJob,
};
use crate::state_machine::{
    BundleJobStatus, CoordinatorActionStatus, CoordinatorJobStatus, WorkflowActionStatus,
    WorkflowJobStatus,
};

/// Coarse lifecycle status shared by every job type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Started,
    Success,
    Suspend,
    Failure,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "STARTED"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Suspend => write!(f, "SUSPEND"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

impl From<WorkflowJobStatus> for Option<EventStatus> {
    fn from(status: WorkflowJobStatus) -> Self {
        match status {
            WorkflowJobStatus::Running => Some(EventStatus::Started),
            WorkflowJobStatus::Succeeded => Some(EventStatus::Success),
            WorkflowJobStatus::Suspended => Some(EventStatus::Suspend),
            WorkflowJobStatus::Killed | WorkflowJobStatus::Failed => Some(EventStatus::Failure),
            WorkflowJobStatus::Prep => None,
        }
    }
}

impl From<WorkflowActionStatus> for Option<EventStatus> {
    fn from(status: WorkflowActionStatus) -> Self {
        match status {
            WorkflowActionStatus::Running => Some(EventStatus::Started),
            WorkflowActionStatus::Ok => Some(EventStatus::Success),
            WorkflowActionStatus::Error
            | WorkflowActionStatus::Killed
            | WorkflowActionStatus::Failed => Some(EventStatus::Failure),
            WorkflowActionStatus::StartManual => Some(EventStatus::Suspend),
            _ => None,
        }
    }
}

impl From<CoordinatorJobStatus> for Option<EventStatus> {
    fn from(status: CoordinatorJobStatus) -> Self {
        match status {
            CoordinatorJobStatus::Running | CoordinatorJobStatus::RunningWithError => {
                Some(EventStatus::Started)
            }
            CoordinatorJobStatus::Succeeded | CoordinatorJobStatus::DoneWithError => {
                Some(EventStatus::Success)
            }
            CoordinatorJobStatus::Suspended
            | CoordinatorJobStatus::PrepSuspended
            | CoordinatorJobStatus::Paused => Some(EventStatus::Suspend),
            CoordinatorJobStatus::Killed | CoordinatorJobStatus::Failed => {
                Some(EventStatus::Failure)
            }
            CoordinatorJobStatus::Prep => None,
        }
    }
}

impl From<CoordinatorActionStatus> for Option<EventStatus> {
    fn from(status: CoordinatorActionStatus) -> Self {
        match status {
            CoordinatorActionStatus::Running => Some(EventStatus::Started),
            CoordinatorActionStatus::Succeeded => Some(EventStatus::Success),
            CoordinatorActionStatus::Suspended => Some(EventStatus::Suspend),
            CoordinatorActionStatus::Killed
            | CoordinatorActionStatus::Failed
            | CoordinatorActionStatus::TimedOut => Some(EventStatus::Failure),
            _ => None,
        }
    }
}

impl From<BundleJobStatus> for Option<EventStatus> {
    fn from(status: BundleJobStatus) -> Self {
        match status {
            BundleJobStatus::Running | BundleJobStatus::RunningWithError => {
                Some(EventStatus::Started)
            }
            BundleJobStatus::Succeeded | BundleJobStatus::DoneWithError => {
                Some(EventStatus::Success)
            }
            BundleJobStatus::Suspended | BundleJobStatus::PrepSuspended => {
                Some(EventStatus::Suspend)
            }
            BundleJobStatus::Killed | BundleJobStatus::Failed => Some(EventStatus::Failure),
            BundleJobStatus::Prep => None,
        }
    }
}

/// Lifecycle event for a job or action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub app_type: AppType,
    pub id: String,
    pub parent_id: Option<String>,
    pub user: String,
    pub app_name: String,
    /// Fine status name of the job type, e.g. `KILLED`
    pub status: String,
    pub event_status: EventStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl JobEvent {
    /// Event for the job's current status; None for statuses that carry no event
    pub fn workflow_job(job: &WorkflowJob) -> Option<Self> {
        let event_status = Option::<EventStatus>::from(job.status)?;
        Some(Self {
            app_type: AppType::WorkflowJob,
            id: job.id.clone(),
            parent_id: job.parent_id.clone(),
            user: job.user.clone(),
            app_name: job.app_name.clone(),
            status: job.status.to_string(),
            event_status,
            start_time: job.start_time,
            end_time: job.end_time,
            error_code: job.error_code.clone(),
            error_message: job.error_message.clone(),
        })
    }

    pub fn workflow_action(action: &WorkflowAction, job: &WorkflowJob) -> Option<Self> {
        let event_status = Option::<EventStatus>::from(action.status)?;
        Some(Self {
            app_type: AppType::WorkflowAction,
            id: action.id.clone(),
            parent_id: Some(job.id.clone()),
            user: job.user.clone(),
            app_name: action.name.clone(),
            status: action.status.to_string(),
            event_status,
            start_time: action.start_time,
            end_time: action.end_time,
            error_code: action.error_code.clone(),
            error_message: action.error_message.clone(),
        })
    }

    pub fn coordinator_job(job: &CoordinatorJob) -> Option<Self> {
        let event_status = Option::<EventStatus>::from(job.status)?;
        Some(Self {
            app_type: AppType::CoordinatorJob,
            id: job.id.clone(),
            parent_id: job.bundle_id.clone(),
            user: job.user.clone(),
            app_name: job.app_name.clone(),
            status: job.status.to_string(),
            event_status,
            start_time: Some(job.start_time),
            end_time: job.status.is_terminal().then_some(job.last_modified_time),
            error_code: None,
            error_message: job.error_message.clone(),
        })
    }

    /// Start / end times come from the child workflow when there is one
    pub fn coordinator_action(
        action: &CoordinatorAction,
        job: &CoordinatorJob,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let event_status = Option::<EventStatus>::from(action.status)?;
        Some(Self {
            app_type: AppType::CoordinatorAction,
            id: action.id.clone(),
            parent_id: Some(job.id.clone()),
            user: job.user.clone(),
            app_name: job.app_name.clone(),
            status: action.status.to_string(),
            event_status,
            start_time,
            end_time,
            error_code: action.error_code.clone(),
            error_message: action.error_message.clone(),
        })
    }

    pub fn bundle_job(job: &BundleJob) -> Option<Self> {
        let event_status = Option::<EventStatus>::from(job.status)?;
        Some(Self {
            app_type: AppType::BundleJob,
            id: job.id.clone(),
            parent_id: None,
            user: job.user.clone(),
            app_name: job.app_name.clone(),
            status: job.status.to_string(),
            event_status,
            start_time: job.start_time,
            end_time: job.end_time,
            error_code: None,
            error_message: None,
        })
    }
}
