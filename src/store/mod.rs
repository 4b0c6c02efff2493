//! # Entity Store
//!
//! Typed reads of job, action and SLA beans plus a single atomic write entry point,
//! [`EntityStore::execute_batch`]. A command accumulates its inserts, updates and
//! deletes in a [`WriteBatch`]; the executor commits the batch once `execute` returns.

pub mod error;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

pub use error::{BeanKind, StoreError, StoreResult, StoreResultExt};
pub use memory::InMemoryEntityStore;

use crate::models::{
    BundleAction, BundleJob, CoordinatorAction, CoordinatorJob, SlaRegistration, SlaSummary,
    WorkflowAction, WorkflowJob,
};
use crate::state_machine::CoordinatorJobStatus;

/// A persisted bean
#[derive(Debug, Clone)]
pub enum Bean {
    WorkflowJob(WorkflowJob),
    WorkflowAction(WorkflowAction),
    CoordinatorJob(CoordinatorJob),
    CoordinatorAction(CoordinatorAction),
    BundleJob(BundleJob),
    BundleAction(BundleAction),
    SlaRegistration(SlaRegistration),
    SlaSummary(SlaSummary),
}

impl Bean {
    pub fn kind(&self) -> BeanKind {
        match self {
            Self::WorkflowJob(_) => BeanKind::WorkflowJob,
            Self::WorkflowAction(_) => BeanKind::WorkflowAction,
            Self::CoordinatorJob(_) => BeanKind::CoordinatorJob,
            Self::CoordinatorAction(_) => BeanKind::CoordinatorAction,
            Self::BundleJob(_) => BeanKind::BundleJob,
            Self::BundleAction(_) => BeanKind::BundleAction,
            Self::SlaRegistration(_) => BeanKind::SlaRegistration,
            Self::SlaSummary(_) => BeanKind::SlaSummary,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::WorkflowJob(bean) => &bean.id,
            Self::WorkflowAction(bean) => &bean.id,
            Self::CoordinatorJob(bean) => &bean.id,
            Self::CoordinatorAction(bean) => &bean.id,
            Self::BundleJob(bean) => &bean.id,
            Self::BundleAction(bean) => &bean.id,
            Self::SlaRegistration(bean) => &bean.id,
            Self::SlaSummary(bean) => &bean.id,
        }
    }
}

macro_rules! bean_from {
    ($($variant:ident),+ $(,)?) => {
        $(
            impl From<$variant> for Bean {
                fn from(bean: $variant) -> Self {
                    Self::$variant(bean)
                }
            }
        )+
    };
}

bean_from!(
    WorkflowJob,
    WorkflowAction,
    CoordinatorJob,
    CoordinatorAction,
    BundleJob,
    BundleAction,
    SlaRegistration,
    SlaSummary,
);

/// Which fields an update writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateQuery {
    /// Replace the whole bean
    Full,
    /// Workflow action: only `pending`, `pending_age`, `execution_path` and `transition`
    WorkflowActionPendingTransition,
    /// SLA summary: statuses, bitmask, job status, last modified
    SlaSummaryStatus,
    /// `SlaSummaryStatus` plus actual start / end / duration
    SlaSummaryStatusActualTimes,
}

impl fmt::Display for UpdateQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "UPDATE_FULL",
            Self::WorkflowActionPendingTransition => "UPDATE_ACTION_PENDING_TRANS",
            Self::SlaSummaryStatus => "UPDATE_SLA_SUMMARY_STATUS",
            Self::SlaSummaryStatusActualTimes => "UPDATE_SLA_SUMMARY_STATUS_ACTUAL_TIMES",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateEntry {
    pub query: UpdateQuery,
    pub bean: Bean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub kind: BeanKind,
    pub id: String,
}

/// Inserts, updates and deletes committed together
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub inserts: Vec<Bean>,
    pub updates: Vec<UpdateEntry>,
    pub deletes: Vec<DeleteEntry>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bean: impl Into<Bean>) -> &mut Self {
        self.inserts.push(bean.into());
        self
    }

    pub fn update(&mut self, bean: impl Into<Bean>) -> &mut Self {
        self.update_with(UpdateQuery::Full, bean)
    }

    pub fn update_with(&mut self, query: UpdateQuery, bean: impl Into<Bean>) -> &mut Self {
        self.updates.push(UpdateEntry {
            query,
            bean: bean.into(),
        });
        self
    }

    pub fn delete(&mut self, kind: BeanKind, id: impl Into<String>) -> &mut Self {
        self.deletes.push(DeleteEntry {
            kind,
            id: id.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn append(&mut self, mut other: WriteBatch) {
        self.inserts.append(&mut other.inserts);
        self.updates.append(&mut other.updates);
        self.deletes.append(&mut other.deletes);
    }
}

/// Transactional persistence of job, action and SLA beans
#[async_trait]
pub trait EntityStore: Send + Sync + fmt::Debug {
    async fn get_workflow_job(&self, id: &str) -> StoreResult<WorkflowJob>;

    async fn get_workflow_action(&self, id: &str) -> StoreResult<WorkflowAction>;

    async fn list_workflow_actions(&self, job_id: &str) -> StoreResult<Vec<WorkflowAction>>;

    async fn get_coordinator_job(&self, id: &str) -> StoreResult<CoordinatorJob>;

    /// Coordinator jobs whose status is one of `statuses`
    async fn list_coordinator_jobs(
        &self,
        statuses: &[CoordinatorJobStatus],
    ) -> StoreResult<Vec<CoordinatorJob>>;

    async fn get_coordinator_action(&self, id: &str) -> StoreResult<CoordinatorAction>;

    /// Actions of a coordinator ordered by action number
    async fn list_coordinator_actions(&self, job_id: &str) -> StoreResult<Vec<CoordinatorAction>>;

    async fn get_bundle_job(&self, id: &str) -> StoreResult<BundleJob>;

    async fn list_bundle_coordinators(&self, bundle_id: &str) -> StoreResult<Vec<BundleAction>>;

    async fn get_sla_registration(&self, id: &str) -> StoreResult<SlaRegistration>;

    async fn get_sla_summary(&self, id: &str) -> StoreResult<SlaSummary>;

    /// Summaries still open (`event_processed <= 7`) modified at or after `modified_after`
    async fn sla_summaries_for_restart(
        &self,
        modified_after: DateTime<Utc>,
    ) -> StoreResult<Vec<SlaSummary>>;

    /// Apply the whole batch or nothing
    async fn execute_batch(&self, batch: WriteBatch) -> StoreResult<()>;
}
