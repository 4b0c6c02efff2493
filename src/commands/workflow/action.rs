//! Commands driving a single workflow action: start through its executor, external
//! completion, and kill.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{NotificationCommand, SignalCommand};
use crate::commands::{deferred, loaded};
use crate::constants::{counters, nodes};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{
    ActionExecutorError, ActionStart, Command, CommandEffects, Precondition, SystemContext,
};
use crate::models::{WorkflowAction, WorkflowJob};
use crate::state_machine::{WorkflowActionStatus, WorkflowJobStatus};

fn action_key(name: &str, action_id: &str) -> String {
    format!("{name}_{action_id}")
}

fn signal_status(signal_value: &str) -> WorkflowActionStatus {
    if signal_value == nodes::OK {
        WorkflowActionStatus::Ok
    } else {
        WorkflowActionStatus::Error
    }
}

/// Start a pending action through the executor registered for its type
#[derive(Debug)]
pub struct ActionStartCommand {
    job_id: String,
    action_id: String,
    job: Option<WorkflowJob>,
    action: Option<WorkflowAction>,
}

impl ActionStartCommand {
    pub fn new(job_id: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            action_id: action_id.into(),
            job: None,
            action: None,
        }
    }
}

#[async_trait]
impl Command for ActionStartCommand {
    fn name(&self) -> &'static str {
        "action.start"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    fn key(&self) -> String {
        action_key(self.name(), &self.action_id)
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        self.action = Some(ctx.store.get_workflow_action(&self.action_id).await?);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        let (Some(job), Some(action)) = (&self.job, &self.action) else {
            return Precondition::Ready;
        };
        if job.status != WorkflowJobStatus::Running {
            return deferred(ErrorCode::E0813, format_args!("job [{}] status [{}]", job.id, job.status));
        }
        if !action.pending || !action.status.is_startable() {
            return deferred(
                ErrorCode::E0815,
                format_args!(
                    "action [{}] status [{}] pending [{}]",
                    action.id, action.status, action.pending
                ),
            );
        }
        Precondition::Ready
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "workflow job")?;
        let mut action = loaded(&mut self.action, "workflow action")?;
        let mut effects = CommandEffects::new();
        action.start_time = Some(Utc::now());

        if action.is_control_node() {
            action.complete(WorkflowActionStatus::Ok, nodes::OK);
            effects.queue(SignalCommand::action(&job.id, &action.id));
            effects.update(action);
            return Ok(effects);
        }

        effects.count(counters::ACTIONS_STARTED);
        let Some(executor) = ctx.action_executors.get(&action.action_type) else {
            warn!(job_id = %job.id, action_id = %action.id, action_type = %action.action_type, "No executor for action type");
            action.set_error(
                ErrorCode::E0802.to_string(),
                format!("no executor for action type [{}]", action.action_type),
            );
            action.complete(WorkflowActionStatus::Error, nodes::ERROR);
            effects.event(JobEvent::workflow_action(&action, &job));
            effects.queue(SignalCommand::action(&job.id, &action.id));
            effects.update(action);
            return Ok(effects);
        };

        match executor.start(&action, &job).await {
            Ok(ActionStart::Completed { signal_value }) => {
                action.complete(signal_status(&signal_value), &signal_value);
                effects.queue(SignalCommand::action(&job.id, &action.id));
            }
            Ok(ActionStart::Running {
                external_id,
                external_status,
            }) => {
                action.status = WorkflowActionStatus::Running;
                action.external_id = Some(external_id);
                action.external_status = external_status;
                action.reset_pending();
            }
            Err(ActionExecutorError::Transient { code, message })
                if action.retries < action.user_retry_max =>
            {
                action.retries += 1;
                action.status = WorkflowActionStatus::StartRetry;
                let delay = Duration::from_secs(action.user_retry_interval_secs);
                debug!(action_id = %action.id, retries = action.retries, delay_secs = delay.as_secs(), "Retrying action start");
                action.set_error(code, message);
                effects.queue_delayed(ActionStartCommand::new(&job.id, &action.id), delay);
            }
            Err(err @ (ActionExecutorError::Transient { .. } | ActionExecutorError::NonTransient { .. })) => {
                warn!(job_id = %job.id, action_id = %action.id, error = %err, "Action start needs manual intervention");
                action.status = WorkflowActionStatus::StartManual;
                action.set_error(err.code(), err.message());
                // stays pending so a resume restarts it
                job.instance_mut()?.suspend()?;
                job.status = WorkflowJobStatus::Suspended;
                job.last_modified_time = Utc::now();
                effects.event(JobEvent::workflow_job(&job));
                effects.queue(NotificationCommand::job(job.clone()));
            }
            Err(ActionExecutorError::Error { code, message }) => {
                action.set_error(code, message);
                action.complete(WorkflowActionStatus::Error, nodes::ERROR);
                effects.queue(SignalCommand::action(&job.id, &action.id));
            }
        }

        effects.event(JobEvent::workflow_action(&action, &job));
        crate::log_command!(
            debug,
            "action_started",
            command: self.name(),
            entity: self.action_id,
            status: action.status,
        );
        if job.status == WorkflowJobStatus::Suspended {
            effects.update(job);
        }
        effects.update(action);
        Ok(effects)
    }
}

/// External completion of a running action
#[derive(Debug)]
pub struct ActionEndCommand {
    job_id: String,
    action_id: String,
    signal_value: String,
    error: Option<(String, String)>,
    job: Option<WorkflowJob>,
    action: Option<WorkflowAction>,
}

impl ActionEndCommand {
    /// `signal_value` is `OK` or `ERROR`
    pub fn new(job_id: impl Into<String>, action_id: impl Into<String>, signal_value: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            action_id: action_id.into(),
            signal_value: signal_value.into(),
            error: None,
            job: None,
            action: None,
        }
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some((code.into(), message.into()));
        self
    }
}

#[async_trait]
impl Command for ActionEndCommand {
    fn name(&self) -> &'static str {
        "action.end"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    fn key(&self) -> String {
        action_key(self.name(), &self.action_id)
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        self.action = Some(ctx.store.get_workflow_action(&self.action_id).await?);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        let (Some(job), Some(action)) = (&self.job, &self.action) else {
            return Precondition::Ready;
        };
        if !matches!(job.status, WorkflowJobStatus::Running | WorkflowJobStatus::Suspended) {
            return deferred(ErrorCode::E0813, format_args!("job [{}] status [{}]", job.id, job.status));
        }
        if !matches!(action.status, WorkflowActionStatus::Running | WorkflowActionStatus::Done) {
            return deferred(
                ErrorCode::E0814,
                format_args!("action [{}] status [{}]", action.id, action.status),
            );
        }
        Precondition::Ready
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let job = loaded(&mut self.job, "workflow job")?;
        let mut action = loaded(&mut self.action, "workflow action")?;
        let mut effects = CommandEffects::new();

        action.complete(signal_status(&self.signal_value), &self.signal_value);
        if let Some((code, message)) = self.error.take() {
            action.set_error(code, message);
        }
        effects.event(JobEvent::workflow_action(&action, &job));
        effects.count(counters::ACTIONS_ENDED);
        effects.queue(SignalCommand::action(&job.id, &action.id));

        crate::log_command!(
            debug,
            "action_ended",
            command: self.name(),
            entity: self.action_id,
            status: action.status,
        );
        effects.update(action);
        Ok(effects)
    }
}

/// Kill an action the instance or a job kill marked KILLED
#[derive(Debug)]
pub struct ActionKillCommand {
    job_id: String,
    action_id: String,
    job: Option<WorkflowJob>,
    action: Option<WorkflowAction>,
}

impl ActionKillCommand {
    pub fn new(job_id: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            action_id: action_id.into(),
            job: None,
            action: None,
        }
    }
}

#[async_trait]
impl Command for ActionKillCommand {
    fn name(&self) -> &'static str {
        "action.kill"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    fn key(&self) -> String {
        action_key(self.name(), &self.action_id)
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        self.action = Some(ctx.store.get_workflow_action(&self.action_id).await?);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.action {
            Some(action) if action.status != WorkflowActionStatus::Killed || !action.pending => deferred(
                ErrorCode::E0814,
                format_args!(
                    "action [{}] status [{}] pending [{}]",
                    action.id, action.status, action.pending
                ),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let job = loaded(&mut self.job, "workflow job")?;
        let mut action = loaded(&mut self.action, "workflow action")?;
        let mut effects = CommandEffects::new();

        if !action.is_control_node() {
            if let Some(executor) = ctx.action_executors.get(&action.action_type) {
                if let Err(err) = executor.kill(&action, &job).await {
                    warn!(job_id = %job.id, action_id = %action.id, error = %err, "Action kill failed");
                }
            }
        }
        action.reset_pending();
        action.end_time = Some(Utc::now());
        effects.event(JobEvent::workflow_action(&action, &job));
        effects.queue(NotificationCommand::action(job, action.clone()));

        crate::log_command!(debug, "action_killed", command: self.name(), entity: self.action_id,);
        effects.update(action);
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, follow_up_keys, run, seed_workflow, two_step_app};
    use crate::events::EventStatus;
    use crate::execution::{ActionExecutor, ActionExecutorRegistry};
    use crate::instance::WorkflowApp;
    use crate::store::{EntityStore, InMemoryEntityStore, WriteBatch};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` starts with the given error, then runs externally
    #[derive(Debug)]
    struct FlakyExecutor {
        failures: u32,
        calls: AtomicU32,
        error: ActionExecutorError,
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        fn action_type(&self) -> &str {
            "flaky"
        }

        async fn start(&self, _action: &WorkflowAction, _job: &WorkflowJob) -> Result<ActionStart, ActionExecutorError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(self.error.clone())
            } else {
                Ok(ActionStart::Running {
                    external_id: "ext-1".to_string(),
                    external_status: Some("RUNNING".to_string()),
                })
            }
        }

        async fn kill(&self, _action: &WorkflowAction, _job: &WorkflowJob) -> Result<(), ActionExecutorError> {
            Ok(())
        }
    }

    fn flaky_context(error: ActionExecutorError, failures: u32) -> (SystemContext, Arc<InMemoryEntityStore>) {
        let (ctx, store) = context();
        let registry = ActionExecutorRegistry::with_defaults();
        registry.register(Arc::new(FlakyExecutor {
            failures,
            calls: AtomicU32::new(0),
            error,
        }));
        (ctx.with_action_executors(Arc::new(registry)), store)
    }

    fn flaky_app(retries: u32) -> WorkflowApp {
        WorkflowApp::builder("flaky")
            .action("call", "flaky", "end", "fail")
            .with_retries(retries, 30)
            .end("end")
            .kill("fail", "call failed")
            .build()
            .unwrap()
    }

    async fn start_workflow(ctx: &SystemContext, store: &InMemoryEntityStore, app: WorkflowApp) {
        seed_workflow(store, "wf-1", app).await;
        run(ctx, &mut SignalCommand::start("wf-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_noop_action_completes_and_signals() {
        let (ctx, store) = context();
        start_workflow(&ctx, &store, two_step_app()).await;

        let effects = run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@extract"))
            .await
            .unwrap();
        let action = store.get_workflow_action("wf-1@extract").await.unwrap();
        assert_eq!(action.status, WorkflowActionStatus::Ok);
        assert!(action.pending);
        assert_eq!(action.signal_value.as_deref(), Some("OK"));
        assert_eq!(effects.counters, vec![counters::ACTIONS_STARTED]);
        assert_eq!(effects.events[0].event_status, EventStatus::Success);
        assert_eq!(follow_up_keys(&effects), vec!["signal_wf-1_wf-1@extract".to_string()]);
    }

    #[tokio::test]
    async fn test_second_start_is_deferred() {
        let (ctx, store) = context();
        start_workflow(&ctx, &store, two_step_app()).await;
        run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@extract"))
            .await
            .unwrap();

        let reason = run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@extract"))
            .await
            .unwrap_err();
        assert!(reason.starts_with("E0815"), "{reason}");
    }

    #[tokio::test]
    async fn test_unknown_action_type_errors_action() {
        let (ctx, store) = context();
        let app = WorkflowApp::builder("shell")
            .action("run", "shell", "end", "end")
            .end("end")
            .build()
            .unwrap();
        start_workflow(&ctx, &store, app).await;

        run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@run")).await.unwrap();
        let action = store.get_workflow_action("wf-1@run").await.unwrap();
        assert_eq!(action.status, WorkflowActionStatus::Error);
        assert_eq!(action.error_code.as_deref(), Some("E0802"));
    }

    #[tokio::test]
    async fn test_transient_failure_retries_with_delay() {
        let transient = ActionExecutorError::Transient {
            code: "JA009".to_string(),
            message: "cluster busy".to_string(),
        };
        let (ctx, store) = flaky_context(transient, 1);
        start_workflow(&ctx, &store, flaky_app(2)).await;

        let effects = run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@call"))
            .await
            .unwrap();
        let action = store.get_workflow_action("wf-1@call").await.unwrap();
        assert_eq!(action.status, WorkflowActionStatus::StartRetry);
        assert_eq!(action.retries, 1);
        assert!(action.pending);
        assert_eq!(effects.follow_ups.len(), 1);
        assert_eq!(effects.follow_ups[0].delay, Duration::from_secs(30));

        run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@call")).await.unwrap();
        let action = store.get_workflow_action("wf-1@call").await.unwrap();
        assert_eq!(action.status, WorkflowActionStatus::Running);
        assert_eq!(action.external_id.as_deref(), Some("ext-1"));
        assert!(!action.pending);
    }

    #[tokio::test]
    async fn test_exhausted_retries_park_action_and_suspend_job() {
        let transient = ActionExecutorError::Transient {
            code: "JA009".to_string(),
            message: "cluster busy".to_string(),
        };
        let (ctx, store) = flaky_context(transient, 5);
        start_workflow(&ctx, &store, flaky_app(0)).await;

        let effects = run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@call"))
            .await
            .unwrap();
        let action = store.get_workflow_action("wf-1@call").await.unwrap();
        assert_eq!(action.status, WorkflowActionStatus::StartManual);
        assert!(action.pending);
        let job = store.get_workflow_job("wf-1").await.unwrap();
        assert_eq!(job.status, WorkflowJobStatus::Suspended);
        assert!(effects
            .events
            .iter()
            .all(|event| event.event_status == EventStatus::Suspend));
    }

    #[tokio::test]
    async fn test_external_completion_signals_workflow() {
        let (ctx, store) = flaky_context(
            ActionExecutorError::Error {
                code: "X".to_string(),
                message: "unused".to_string(),
            },
            0,
        );
        start_workflow(&ctx, &store, flaky_app(0)).await;
        run(&ctx, &mut ActionStartCommand::new("wf-1", "wf-1@call")).await.unwrap();

        let mut end = ActionEndCommand::new("wf-1", "wf-1@call", "ERROR").with_error("EXIT2", "exit code 2");
        let effects = run(&ctx, &mut end).await.unwrap();
        let action = store.get_workflow_action("wf-1@call").await.unwrap();
        assert_eq!(action.status, WorkflowActionStatus::Error);
        assert_eq!(action.error_code.as_deref(), Some("EXIT2"));
        assert!(action.pending);
        assert_eq!(effects.counters, vec![counters::ACTIONS_ENDED]);
        assert_eq!(follow_up_keys(&effects), vec!["signal_wf-1_wf-1@call".to_string()]);

        let reason = run(&ctx, &mut ActionEndCommand::new("wf-1", "wf-1@call", "OK"))
            .await
            .unwrap_err();
        assert!(reason.starts_with("E0814"), "{reason}");
    }

    #[tokio::test]
    async fn test_kill_clears_pending() {
        let (ctx, store) = context();
        start_workflow(&ctx, &store, two_step_app()).await;
        let mut action = store.get_workflow_action("wf-1@extract").await.unwrap();
        action.status = WorkflowActionStatus::Killed;
        action.set_pending();
        let mut batch = WriteBatch::new();
        batch.update(action);
        store.execute_batch(batch).await.unwrap();

        let effects = run(&ctx, &mut ActionKillCommand::new("wf-1", "wf-1@extract"))
            .await
            .unwrap();
        let action = store.get_workflow_action("wf-1@extract").await.unwrap();
        assert!(!action.pending);
        assert!(action.end_time.is_some());
        assert_eq!(effects.events[0].event_status, EventStatus::Failure);
    }
}
