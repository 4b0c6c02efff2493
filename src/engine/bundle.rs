//! Bundle job requests.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

use super::coordinator::validate_definition;
use super::{call, require_user};
use crate::commands::{
    BundleKillCommand, BundleResumeCommand, BundleStartCommand, BundleSubmitCommand,
    BundleSuspendCommand,
};
use crate::error::{JobflowError, Result};
use crate::execution::CommandExecutor;
use crate::ids::JobType;
use crate::models::{BundleAction, BundleJob, CoordinatorDefinition, JobConf};

/// A bundle submission
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub name: String,
    pub coordinators: Vec<CoordinatorDefinition>,
    pub conf: JobConf,
    pub kickoff_time: Option<DateTime<Utc>>,
}

impl BundleRequest {
    pub fn new(name: impl Into<String>, coordinators: Vec<CoordinatorDefinition>) -> Self {
        Self {
            name: name.into(),
            coordinators,
            conf: JobConf::new(),
            kickoff_time: None,
        }
    }

    pub fn with_conf(mut self, conf: JobConf) -> Self {
        self.conf = conf;
        self
    }

    pub fn with_kickoff(mut self, kickoff_time: DateTime<Utc>) -> Self {
        self.kickoff_time = Some(kickoff_time);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.coordinators.is_empty() {
            return Err(JobflowError::InvalidInput(format!(
                "bundle [{}] has no coordinators",
                self.name
            )));
        }
        let mut names = HashSet::new();
        for definition in &self.coordinators {
            if !names.insert(definition.name.as_str()) {
                return Err(JobflowError::InvalidInput(format!(
                    "bundle [{}] declares coordinator [{}] twice",
                    self.name, definition.name
                )));
            }
            validate_definition(definition)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BundleEngine {
    executor: Arc<CommandExecutor>,
}

impl BundleEngine {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }

    #[instrument(skip(self, request), fields(bundle = %request.name))]
    pub async fn submit(&self, request: BundleRequest, user: &str) -> Result<String> {
        require_user(user)?;
        request.validate()?;
        let bundle_id = self.executor.context().ids.next_id(JobType::Bundle);
        let mut bundle = BundleJob::new(&bundle_id, request.name, request.coordinators, request.conf, user);
        bundle.kickoff_time = request.kickoff_time;
        call(&self.executor, BundleSubmitCommand::new(bundle)).await?;
        info!(bundle_id = %bundle_id, "Submitted bundle job");
        Ok(bundle_id)
    }

    /// Submit and start; coordinators are created at the kickoff time
    pub async fn run(&self, request: BundleRequest, user: &str) -> Result<String> {
        let bundle_id = self.submit(request, user).await?;
        self.start(&bundle_id).await?;
        Ok(bundle_id)
    }

    #[instrument(skip(self))]
    pub async fn start(&self, bundle_id: &str) -> Result<()> {
        call(&self.executor, BundleStartCommand::new(bundle_id)).await
    }

    #[instrument(skip(self))]
    pub async fn suspend(&self, bundle_id: &str) -> Result<()> {
        call(&self.executor, BundleSuspendCommand::new(bundle_id)).await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, bundle_id: &str) -> Result<()> {
        call(&self.executor, BundleResumeCommand::new(bundle_id)).await
    }

    #[instrument(skip(self))]
    pub async fn kill(&self, bundle_id: &str) -> Result<()> {
        call(&self.executor, BundleKillCommand::new(bundle_id)).await
    }

    pub async fn job_info(&self, bundle_id: &str) -> Result<BundleJob> {
        Ok(self.executor.context().store.get_bundle_job(bundle_id).await?)
    }

    /// Bundle actions in coordinator-name order
    pub async fn coordinators(&self, bundle_id: &str) -> Result<Vec<BundleAction>> {
        Ok(self.executor.context().store.list_bundle_coordinators(bundle_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::coordinator::test_support::hourly;
    use crate::engine::test_support::executor;
    use crate::state_machine::BundleJobStatus;

    fn request() -> BundleRequest {
        let mut nightly = hourly(48);
        nightly.name = "nightly".to_string();
        nightly.frequency = 24;
        BundleRequest::new("etl-bundle", vec![hourly(3), nightly])
    }

    #[tokio::test]
    async fn test_run_submits_coordinators() {
        let (executor, _store) = executor();
        let engine = BundleEngine::new(executor.clone());

        let bundle_id = engine.run(request(), "alice").await.unwrap();
        assert!(bundle_id.ends_with("-B"));
        assert_eq!(engine.job_info(&bundle_id).await.unwrap().status, BundleJobStatus::Running);
        let actions = engine.coordinators(&bundle_id).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|action| action.coord_id.is_some()));
        assert_eq!(executor.queue_len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_coordinators_rejected() {
        let (executor, _store) = executor();
        let engine = BundleEngine::new(executor);

        let duplicated = BundleRequest::new("dup", vec![hourly(3), hourly(3)]);
        assert!(matches!(engine.submit(duplicated, "alice").await, Err(JobflowError::InvalidInput(_))));
        let empty = BundleRequest::new("empty", Vec::new());
        assert!(matches!(engine.submit(empty, "alice").await, Err(JobflowError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_suspend_resume_kill() {
        let (executor, _store) = executor();
        let engine = BundleEngine::new(executor);
        let bundle_id = engine.submit(request(), "alice").await.unwrap();

        engine.suspend(&bundle_id).await.unwrap();
        assert_eq!(
            engine.job_info(&bundle_id).await.unwrap().status,
            BundleJobStatus::PrepSuspended
        );
        assert!(matches!(engine.start(&bundle_id).await, Err(JobflowError::InvalidState(_))));
        engine.resume(&bundle_id).await.unwrap();
        engine.kill(&bundle_id).await.unwrap();
        assert_eq!(engine.job_info(&bundle_id).await.unwrap().status, BundleJobStatus::Killed);
    }
}
