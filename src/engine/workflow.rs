//! Workflow job requests: submit, start, suspend, resume, kill, re-run and external
//! action callbacks.

use std::sync::Arc;
use tracing::{info, instrument};

use super::{call, require_user};
use crate::commands::{
    ActionEndCommand, KillCommand, ReRunCommand, ResumeCommand, SignalCommand, SubmitCommand,
    SuspendCommand,
};
use crate::constants::{nodes, parent_of};
use crate::error::{JobflowError, Result};
use crate::execution::CommandExecutor;
use crate::ids::JobType;
use crate::instance::WorkflowApp;
use crate::models::{JobConf, WorkflowAction, WorkflowJob};

#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    executor: Arc<CommandExecutor>,
}

impl WorkflowEngine {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Persist a PREP job and return its id
    #[instrument(skip(self, app, conf), fields(app = %app.name))]
    pub async fn submit(&self, app: WorkflowApp, conf: JobConf, user: &str) -> Result<String> {
        require_user(user)?;
        app.validate()?;
        let job_id = self.executor.context().ids.next_id(JobType::Workflow);
        call(&self.executor, SubmitCommand::new(&job_id, app, conf, user)).await?;
        info!(job_id = %job_id, "Submitted workflow job");
        Ok(job_id)
    }

    /// Submit and immediately start
    pub async fn run(&self, app: WorkflowApp, conf: JobConf, user: &str) -> Result<String> {
        let job_id = self.submit(app, conf, user).await?;
        self.start(&job_id).await?;
        Ok(job_id)
    }

    #[instrument(skip(self))]
    pub async fn start(&self, job_id: &str) -> Result<()> {
        call(&self.executor, SignalCommand::start(job_id)).await
    }

    #[instrument(skip(self))]
    pub async fn suspend(&self, job_id: &str) -> Result<()> {
        call(&self.executor, SuspendCommand::new(job_id)).await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, job_id: &str) -> Result<()> {
        call(&self.executor, ResumeCommand::new(job_id)).await
    }

    #[instrument(skip(self))]
    pub async fn kill(&self, job_id: &str) -> Result<()> {
        call(&self.executor, KillCommand::new(job_id)).await
    }

    /// Re-run a terminal job, keeping the successful `skip_nodes`
    #[instrument(skip(self, conf))]
    pub async fn rerun(&self, job_id: &str, skip_nodes: Vec<String>, conf: JobConf) -> Result<()> {
        call(&self.executor, ReRunCommand::new(job_id, skip_nodes, conf)).await
    }

    /// Callback from an action executor: the action finished with `OK` or `ERROR`
    #[instrument(skip(self))]
    pub async fn action_completed(&self, action_id: &str, signal_value: &str) -> Result<()> {
        let job_id = job_of(action_id)?;
        call(&self.executor, ActionEndCommand::new(job_id, action_id, signal_value)).await
    }

    /// Callback from an action executor: the action failed with an error
    #[instrument(skip(self, message))]
    pub async fn action_failed(&self, action_id: &str, code: &str, message: &str) -> Result<()> {
        let job_id = job_of(action_id)?;
        let command = ActionEndCommand::new(job_id, action_id, nodes::ERROR).with_error(code, message);
        call(&self.executor, command).await
    }

    pub async fn job_info(&self, job_id: &str) -> Result<WorkflowJob> {
        Ok(self.executor.context().store.get_workflow_job(job_id).await?)
    }

    pub async fn actions(&self, job_id: &str) -> Result<Vec<WorkflowAction>> {
        Ok(self.executor.context().store.list_workflow_actions(job_id).await?)
    }
}

fn job_of(action_id: &str) -> Result<&str> {
    parent_of(action_id).ok_or_else(|| JobflowError::InvalidInput(format!("not an action id [{action_id}]")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::two_step_app;
    use crate::engine::test_support::executor;
    use crate::error::ErrorCode;
    use crate::state_machine::WorkflowJobStatus;

    #[tokio::test]
    async fn test_submit_returns_persisted_prep_job() {
        let (executor, _store) = executor();
        let engine = WorkflowEngine::new(executor);

        let job_id = engine.submit(two_step_app(), JobConf::new(), "alice").await.unwrap();
        assert!(job_id.ends_with("-test-W"), "{job_id}");
        let job = engine.job_info(&job_id).await.unwrap();
        assert_eq!(job.status, WorkflowJobStatus::Prep);
        assert_eq!(job.user, "alice");
    }

    #[tokio::test]
    async fn test_start_runs_job_and_queues_first_action() {
        let (executor, _store) = executor();
        let engine = WorkflowEngine::new(executor.clone());

        let job_id = engine.run(two_step_app(), JobConf::new(), "alice").await.unwrap();
        assert_eq!(engine.job_info(&job_id).await.unwrap().status, WorkflowJobStatus::Running);
        assert!(executor.queue_len() > 0);

        let err = engine.start(&job_id).await.unwrap_err();
        assert!(matches!(err, JobflowError::Command(ref e) if e.code == ErrorCode::E0801), "{err}");

        let err = engine.resume(&job_id).await.unwrap_err();
        assert!(matches!(err, JobflowError::InvalidState(_)), "{err}");
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let (executor, _store) = executor();
        let engine = WorkflowEngine::new(executor);

        let err = engine.submit(two_step_app(), JobConf::new(), " ").await.unwrap_err();
        assert!(matches!(err, JobflowError::InvalidInput(_)));

        let err = engine.kill("0000001-missing-W").await.unwrap_err();
        assert!(matches!(err, JobflowError::Command(ref e) if e.code == ErrorCode::E0604), "{err}");

        let err = engine.action_completed("no-separator", "OK").await.unwrap_err();
        assert!(matches!(err, JobflowError::InvalidInput(_)));
    }
}
