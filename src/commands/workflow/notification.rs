//! Delivery of job and action transitions to the [`JobNotifier`](crate::execution::JobNotifier),
//! and end-of-job workspace cleanup.

use async_trait::async_trait;
use tracing::warn;

use crate::commands::{deferred, loaded};
use crate::error::{CommandError, ErrorCode};
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{CoordinatorAction, WorkflowAction, WorkflowJob};

/// Snapshot of the bean whose transition is being reported
#[derive(Debug, Clone)]
pub enum Notification {
    Job(WorkflowJob),
    Action {
        job: WorkflowJob,
        action: WorkflowAction,
    },
    CoordinatorAction(CoordinatorAction),
}

impl Notification {
    pub fn id(&self) -> &str {
        match self {
            Self::Job(job) => &job.id,
            Self::Action { action, .. } => &action.id,
            Self::CoordinatorAction(action) => &action.id,
        }
    }

    pub fn status(&self) -> String {
        match self {
            Self::Job(job) => job.status.to_string(),
            Self::Action { action, .. } => action.status.to_string(),
            Self::CoordinatorAction(action) => action.status.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct NotificationCommand {
    notification: Notification,
}

impl NotificationCommand {
    pub fn new(notification: Notification) -> Self {
        Self { notification }
    }

    pub fn job(job: WorkflowJob) -> Self {
        Self::new(Notification::Job(job))
    }

    pub fn action(job: WorkflowJob, action: WorkflowAction) -> Self {
        Self::new(Notification::Action { job, action })
    }

    pub fn coordinator_action(action: CoordinatorAction) -> Self {
        Self::new(Notification::CoordinatorAction(action))
    }
}

#[async_trait]
impl Command for NotificationCommand {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn entity_key(&self) -> &str {
        self.notification.id()
    }

    /// One notification per reported status
    fn key(&self) -> String {
        format!("{}_{}_{}", self.name(), self.entity_key(), self.notification.status())
    }

    async fn load_state(&mut self, _ctx: &SystemContext) -> Result<(), CommandError> {
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        Precondition::Ready
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        match &self.notification {
            Notification::Job(job) => ctx.notifier.notify_workflow_job(job).await,
            Notification::Action { job, action } => ctx.notifier.notify_workflow_action(action, job).await,
            Notification::CoordinatorAction(action) => ctx.notifier.notify_coordinator_action(action).await,
        }
        Ok(CommandEffects::new())
    }
}

/// Cleans up the workspace of a finished workflow
#[derive(Debug)]
pub struct WorkflowEndCommand {
    job_id: String,
    job: Option<WorkflowJob>,
}

impl WorkflowEndCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
        }
    }
}

#[async_trait]
impl Command for WorkflowEndCommand {
    fn name(&self) -> &'static str {
        "workflow.end"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.job {
            Some(job) if !job.status.is_terminal() => deferred(
                ErrorCode::E1010,
                format_args!("job [{}] status [{}]", job.id, job.status),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let job = loaded(&mut self.job, "workflow job")?;
        if let Err(err) = ctx.workspace.cleanup(&job).await {
            warn!(job_id = %job.id, error = %err, "Workspace cleanup failed");
        }
        Ok(CommandEffects::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, run, seed_workflow, two_step_app};
    use crate::execution::{JobNotifier, JobWorkspace};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobNotifier for Recorder {
        async fn notify_workflow_job(&self, job: &WorkflowJob) {
            self.seen.lock().push(format!("job {} {}", job.id, job.status));
        }

        async fn notify_workflow_action(&self, action: &WorkflowAction, _job: &WorkflowJob) {
            self.seen.lock().push(format!("action {} {}", action.id, action.status));
        }
    }

    #[async_trait]
    impl JobWorkspace for Recorder {
        async fn cleanup(&self, job: &WorkflowJob) -> Result<(), String> {
            self.seen.lock().push(format!("cleanup {}", job.id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notifications_reach_notifier_with_status_in_key() {
        let recorder = Arc::new(Recorder::default());
        let (ctx, store) = context();
        let ctx = ctx.with_notifier(recorder.clone());
        let job = seed_workflow(&store, "wf-1", two_step_app()).await;

        let mut command = NotificationCommand::job(job);
        assert_eq!(command.key(), "notification_wf-1_PREP");
        run(&ctx, &mut command).await.unwrap();
        assert_eq!(*recorder.seen.lock(), vec!["job wf-1 PREP".to_string()]);
    }

    #[tokio::test]
    async fn test_workflow_end_waits_for_terminal_status() {
        let recorder = Arc::new(Recorder::default());
        let (ctx, store) = context();
        let ctx = ctx.with_workspace(recorder.clone());
        seed_workflow(&store, "wf-1", two_step_app()).await;

        let reason = run(&ctx, &mut WorkflowEndCommand::new("wf-1")).await.unwrap_err();
        assert!(reason.starts_with("E1010"), "{reason}");

        run(&ctx, &mut crate::commands::KillCommand::new("wf-1")).await.unwrap();
        run(&ctx, &mut WorkflowEndCommand::new("wf-1")).await.unwrap();
        assert_eq!(*recorder.seen.lock(), vec!["cleanup wf-1".to_string()]);
    }
}
