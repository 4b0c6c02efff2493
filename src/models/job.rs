use chrono::{DateTime, Utc};

use super::{BundleJob, CoordinatorJob, WorkflowJob};
use crate::ids::JobType;

/// Common view over the three job variants
pub trait JobBean {
    fn id(&self) -> &str;
    fn job_type(&self) -> JobType;
    fn status_name(&self) -> &'static str;
    fn app_name(&self) -> &str;
    fn user(&self) -> &str;
    fn is_terminal(&self) -> bool;
    fn start_time(&self) -> Option<DateTime<Utc>>;
    fn end_time(&self) -> Option<DateTime<Utc>>;
    fn last_modified_time(&self) -> DateTime<Utc>;
}

impl JobBean for WorkflowJob {
    fn id(&self) -> &str {
        &self.id
    }
    fn job_type(&self) -> JobType {
        JobType::Workflow
    }
    fn status_name(&self) -> &'static str {
        self.status.as_str()
    }
    fn app_name(&self) -> &str {
        &self.app_name
    }
    fn user(&self) -> &str {
        &self.user
    }
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }
    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }
    fn last_modified_time(&self) -> DateTime<Utc> {
        self.last_modified_time
    }
}

impl JobBean for CoordinatorJob {
    fn id(&self) -> &str {
        &self.id
    }
    fn job_type(&self) -> JobType {
        JobType::Coordinator
    }
    fn status_name(&self) -> &'static str {
        self.status.as_str()
    }
    fn app_name(&self) -> &str {
        &self.app_name
    }
    fn user(&self) -> &str {
        &self.user
    }
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
    fn start_time(&self) -> Option<DateTime<Utc>> {
        Some(self.start_time)
    }
    fn end_time(&self) -> Option<DateTime<Utc>> {
        Some(self.end_time)
    }
    fn last_modified_time(&self) -> DateTime<Utc> {
        self.last_modified_time
    }
}

impl JobBean for BundleJob {
    fn id(&self) -> &str {
        &self.id
    }
    fn job_type(&self) -> JobType {
        JobType::Bundle
    }
    fn status_name(&self) -> &'static str {
        self.status.as_str()
    }
    fn app_name(&self) -> &str {
        &self.app_name
    }
    fn user(&self) -> &str {
        &self.user
    }
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }
    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }
    fn last_modified_time(&self) -> DateTime<Utc> {
        self.last_modified_time
    }
}

/// Any top-level job
#[derive(Debug, Clone)]
pub enum Job {
    Workflow(WorkflowJob),
    Coordinator(CoordinatorJob),
    Bundle(BundleJob),
}

impl Job {
    fn bean(&self) -> &dyn JobBean {
        match self {
            Self::Workflow(job) => job,
            Self::Coordinator(job) => job,
            Self::Bundle(job) => job,
        }
    }
}

impl JobBean for Job {
    fn id(&self) -> &str {
        self.bean().id()
    }
    fn job_type(&self) -> JobType {
        self.bean().job_type()
    }
    fn status_name(&self) -> &'static str {
        self.bean().status_name()
    }
    fn app_name(&self) -> &str {
        self.bean().app_name()
    }
    fn user(&self) -> &str {
        self.bean().user()
    }
    fn is_terminal(&self) -> bool {
        self.bean().is_terminal()
    }
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.bean().start_time()
    }
    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.bean().end_time()
    }
    fn last_modified_time(&self) -> DateTime<Utc> {
        self.bean().last_modified_time()
    }
}

impl From<WorkflowJob> for Job {
    fn from(job: WorkflowJob) -> Self {
        Self::Workflow(job)
    }
}

impl From<CoordinatorJob> for Job {
    fn from(job: CoordinatorJob) -> Self {
        Self::Coordinator(job)
    }
}

impl From<BundleJob> for Job {
    fn from(job: BundleJob) -> Self {
        Self::Bundle(job)
    }
}
