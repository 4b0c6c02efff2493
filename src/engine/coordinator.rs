//! Coordinator job requests.

use std::sync::Arc;
use tracing::{info, instrument};

use super::{call, require_user};
use crate::commands::{
    CoordChange, CoordChangeCommand, CoordKillCommand, CoordResumeCommand, CoordSubmitCommand,
    CoordSuspendCommand,
};
use crate::error::{JobflowError, Result};
use crate::execution::CommandExecutor;
use crate::ids::JobType;
use crate::models::{CoordinatorAction, CoordinatorDefinition, CoordinatorJob};

/// Reject definitions that could never materialize an action
pub(crate) fn validate_definition(definition: &CoordinatorDefinition) -> Result<()> {
    let invalid = |reason: String| {
        JobflowError::InvalidInput(format!("coordinator [{}]: {reason}", definition.name))
    };
    if definition.name.trim().is_empty() {
        return Err(JobflowError::InvalidInput("coordinator name must not be empty".to_string()));
    }
    if definition.frequency <= 0 {
        return Err(invalid(format!("frequency must be positive, got {}", definition.frequency)));
    }
    if definition.end_time <= definition.start_time {
        return Err(invalid(format!(
            "end time {} is not after start time {}",
            definition.end_time, definition.start_time
        )));
    }
    if definition.concurrency == 0 {
        return Err(invalid("concurrency must not be zero".to_string()));
    }
    definition.workflow.validate()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CoordinatorEngine {
    executor: Arc<CommandExecutor>,
}

impl CoordinatorEngine {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Persist a PREP coordinator; its first materialization is queued on commit
    #[instrument(skip(self, definition), fields(coordinator = %definition.name))]
    pub async fn submit(&self, definition: CoordinatorDefinition, user: &str) -> Result<String> {
        require_user(user)?;
        validate_definition(&definition)?;
        let job_id = self.executor.context().ids.next_id(JobType::Coordinator);
        call(&self.executor, CoordSubmitCommand::new(&job_id, definition, user)).await?;
        info!(job_id = %job_id, "Submitted coordinator job");
        Ok(job_id)
    }

    #[instrument(skip(self))]
    pub async fn suspend(&self, job_id: &str) -> Result<()> {
        call(&self.executor, CoordSuspendCommand::new(job_id)).await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, job_id: &str) -> Result<()> {
        call(&self.executor, CoordResumeCommand::new(job_id)).await
    }

    #[instrument(skip(self))]
    pub async fn kill(&self, job_id: &str) -> Result<()> {
        call(&self.executor, CoordKillCommand::new(job_id)).await
    }

    /// Apply a `concurrency=N;endtime=T;pausetime=T` change request
    #[instrument(skip(self))]
    pub async fn change(&self, job_id: &str, change: &str) -> Result<()> {
        let change: CoordChange = change.parse()?;
        call(&self.executor, CoordChangeCommand::new(job_id, change)).await
    }

    pub async fn job_info(&self, job_id: &str) -> Result<CoordinatorJob> {
        Ok(self.executor.context().store.get_coordinator_job(job_id).await?)
    }

    /// Materialized actions in action-number order
    pub async fn actions(&self, job_id: &str) -> Result<Vec<CoordinatorAction>> {
        Ok(self.executor.context().store.list_coordinator_actions(job_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::coordinator::test_support::hourly;
    use crate::engine::test_support::executor;
    use crate::error::ErrorCode;
    use crate::state_machine::CoordinatorJobStatus;
    use crate::store::EntityStore;

    #[tokio::test]
    async fn test_submit_queues_materialization() {
        let (executor, _store) = executor();
        let engine = CoordinatorEngine::new(executor.clone());

        let job_id = engine.submit(hourly(3), "alice").await.unwrap();
        assert!(job_id.ends_with("-C"));
        assert_eq!(engine.job_info(&job_id).await.unwrap().status, CoordinatorJobStatus::Prep);
        assert_eq!(executor.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_definitions_are_rejected_before_submit() {
        let (executor, store) = executor();
        let engine = CoordinatorEngine::new(executor);

        let mut backwards = hourly(3);
        backwards.end_time = backwards.start_time;
        assert!(matches!(
            engine.submit(backwards, "alice").await,
            Err(JobflowError::InvalidInput(_))
        ));

        let mut never = hourly(3);
        never.frequency = 0;
        assert!(matches!(engine.submit(never, "alice").await, Err(JobflowError::InvalidInput(_))));
        assert!(store.list_coordinator_jobs(&[CoordinatorJobStatus::Prep]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_and_lifecycle() {
        let (executor, _store) = executor();
        let engine = CoordinatorEngine::new(executor);
        let job_id = engine.submit(hourly(3), "alice").await.unwrap();

        engine.change(&job_id, "concurrency=4").await.unwrap();
        assert_eq!(engine.job_info(&job_id).await.unwrap().concurrency, 4);

        let err = engine.change(&job_id, "colour=blue").await.unwrap_err();
        assert!(matches!(err, JobflowError::Command(ref e) if e.code == ErrorCode::E1012), "{err}");

        engine.suspend(&job_id).await.unwrap();
        assert_eq!(
            engine.job_info(&job_id).await.unwrap().status,
            CoordinatorJobStatus::PrepSuspended
        );
        engine.kill(&job_id).await.unwrap();
        assert_eq!(engine.job_info(&job_id).await.unwrap().status, CoordinatorJobStatus::Killed);
        assert!(matches!(engine.resume(&job_id).await, Err(JobflowError::InvalidState(_))));
    }
}
