//! External collaborators commands talk to: action executors, the job notifier,
//! the per-job workspace and the coordinator input dependency checker.
//!
//! Each has a trivial default so an engine can run embedded without any of the
//! surrounding infrastructure.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::nodes;
use crate::models::{CoordinatorAction, WorkflowAction, WorkflowJob};

/// What an executor reports after starting an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStart {
    /// Finished synchronously; `signal_value` is `OK` or `ERROR`
    Completed { signal_value: String },
    /// Running externally; completion arrives through `ActionEndCommand`
    Running {
        external_id: String,
        external_status: Option<String>,
    },
}

impl ActionStart {
    pub fn ok() -> Self {
        Self::Completed {
            signal_value: nodes::OK.to_string(),
        }
    }

    pub fn error() -> Self {
        Self::Completed {
            signal_value: nodes::ERROR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionExecutorError {
    /// Retry automatically after the action's retry interval
    #[error("transient {code}: {message}")]
    Transient { code: String, message: String },
    /// Needs user intervention; the action parks in START_MANUAL
    #[error("non-transient {code}: {message}")]
    NonTransient { code: String, message: String },
    /// The action itself failed; follow its error transition
    #[error("error {code}: {message}")]
    Error { code: String, message: String },
}

impl ActionExecutorError {
    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. } | Self::NonTransient { code, .. } | Self::Error { code, .. } => {
                code
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. }
            | Self::NonTransient { message, .. }
            | Self::Error { message, .. } => message,
        }
    }
}

/// Runs actions of one type
#[async_trait]
pub trait ActionExecutor: Send + Sync + fmt::Debug {
    fn action_type(&self) -> &str;

    async fn start(
        &self,
        action: &WorkflowAction,
        job: &WorkflowJob,
    ) -> Result<ActionStart, ActionExecutorError>;

    async fn kill(&self, action: &WorkflowAction, job: &WorkflowJob) -> Result<(), ActionExecutorError>;
}

/// Executor that completes every action with `OK` immediately
#[derive(Debug, Clone)]
pub struct NoopActionExecutor {
    action_type: String,
}

impl NoopActionExecutor {
    pub const ACTION_TYPE: &'static str = "noop";

    pub fn new() -> Self {
        Self::for_type(Self::ACTION_TYPE)
    }

    pub fn for_type(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
        }
    }
}

impl Default for NoopActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for NoopActionExecutor {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn start(
        &self,
        _action: &WorkflowAction,
        _job: &WorkflowJob,
    ) -> Result<ActionStart, ActionExecutorError> {
        Ok(ActionStart::ok())
    }

    async fn kill(&self, _action: &WorkflowAction, _job: &WorkflowJob) -> Result<(), ActionExecutorError> {
        Ok(())
    }
}

/// Action executors keyed by action type
#[derive(Debug, Default)]
pub struct ActionExecutorRegistry {
    executors: DashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `noop` executor installed
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(NoopActionExecutor::new()));
        registry
    }

    pub fn register(&self, executor: Arc<dyn ActionExecutor>) {
        info!(action_type = executor.action_type(), "Registered action executor");
        self.executors
            .insert(executor.action_type().to_string(), executor);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(action_type).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.executors.contains_key(action_type)
    }
}

/// Delivers job and action transitions to interested parties
#[async_trait]
pub trait JobNotifier: Send + Sync + fmt::Debug {
    async fn notify_workflow_job(&self, job: &WorkflowJob);

    async fn notify_workflow_action(&self, action: &WorkflowAction, job: &WorkflowJob);

    async fn notify_coordinator_action(&self, _action: &CoordinatorAction) {}
}

#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl JobNotifier for LoggingNotifier {
    async fn notify_workflow_job(&self, job: &WorkflowJob) {
        info!(job_id = %job.id, status = %job.status, "Workflow job notification");
    }

    async fn notify_workflow_action(&self, action: &WorkflowAction, job: &WorkflowJob) {
        info!(
            job_id = %job.id,
            action_id = %action.id,
            status = %action.status,
            transition = ?action.transition,
            "Workflow action notification"
        );
    }

    async fn notify_coordinator_action(&self, action: &CoordinatorAction) {
        info!(action_id = %action.id, status = %action.status, "Coordinator action notification");
    }
}

/// Per-job scratch space removed once the job ends
#[async_trait]
pub trait JobWorkspace: Send + Sync + fmt::Debug {
    async fn cleanup(&self, job: &WorkflowJob) -> Result<(), String>;
}

#[derive(Debug, Default, Clone)]
pub struct NoopWorkspace;

#[async_trait]
impl JobWorkspace for NoopWorkspace {
    async fn cleanup(&self, job: &WorkflowJob) -> Result<(), String> {
        debug!(job_id = %job.id, "No workspace to clean up");
        Ok(())
    }
}

/// Resolves coordinator input dependencies
#[async_trait]
pub trait InputDependencyChecker: Send + Sync + fmt::Debug {
    /// Dependencies from `dependencies` that are not yet available
    async fn missing(&self, action: &CoordinatorAction, dependencies: &[String]) -> Vec<String>;
}

/// Every dependency is considered present
#[derive(Debug, Default, Clone)]
pub struct AlwaysAvailable;

#[async_trait]
impl InputDependencyChecker for AlwaysAvailable {
    async fn missing(&self, _action: &CoordinatorAction, _dependencies: &[String]) -> Vec<String> {
        Vec::new()
    }
}

/// Dependencies become available when published
#[derive(Debug, Default)]
pub struct StaticDependencyChecker {
    available: RwLock<HashSet<String>>,
}

impl StaticDependencyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, uri: impl Into<String>) {
        self.available.write().insert(uri.into());
    }
}

#[async_trait]
impl InputDependencyChecker for StaticDependencyChecker {
    async fn missing(&self, _action: &CoordinatorAction, dependencies: &[String]) -> Vec<String> {
        let available = self.available.read();
        dependencies
            .iter()
            .filter(|uri| !available.contains(*uri))
            .cloned()
            .collect()
    }
}
