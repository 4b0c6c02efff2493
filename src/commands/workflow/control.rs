//! User-initiated workflow job transitions: suspend, resume and kill.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{ActionKillCommand, ActionStartCommand, NotificationCommand, SignalCommand, WorkflowEndCommand};
use crate::commands::coordinator::CoordActionUpdateCommand;
use crate::commands::{deferred, loaded};
use crate::constants::counters;
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{WorkflowAction, WorkflowJob};
use crate::state_machine::{WorkflowActionStatus, WorkflowJobStatus};

/// Event, notification and parent update shared by every job transition
fn job_transition_effects(job: &WorkflowJob, effects: &mut CommandEffects) {
    effects.event(JobEvent::workflow_job(job));
    effects.queue(NotificationCommand::job(job.clone()));
    if let Some(parent_id) = &job.parent_id {
        effects.queue(CoordActionUpdateCommand::new(parent_id));
    }
}

fn require_status(job: Option<&WorkflowJob>, allowed: &[WorkflowJobStatus]) -> Precondition {
    match job {
        Some(job) if !allowed.contains(&job.status) => deferred(
            ErrorCode::E1010,
            format_args!("job [{}] status [{}]", job.id, job.status),
        ),
        _ => Precondition::Ready,
    }
}

#[derive(Debug)]
pub struct SuspendCommand {
    job_id: String,
    job: Option<WorkflowJob>,
}

impl SuspendCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
        }
    }
}

#[async_trait]
impl Command for SuspendCommand {
    fn name(&self) -> &'static str {
        "suspend"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        require_status(self.job.as_ref(), &[WorkflowJobStatus::Running])
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "workflow job")?;
        let mut effects = CommandEffects::new();

        job.instance_mut()?.suspend()?;
        job.status = WorkflowJobStatus::Suspended;
        job.last_modified_time = Utc::now();
        job_transition_effects(&job, &mut effects);

        crate::log_command!(info, "workflow_suspended", command: self.name(), entity: self.job_id,);
        effects.update(job);
        Ok(effects)
    }
}

/// Resume a suspended job and re-queue whatever its pending actions were waiting for
#[derive(Debug)]
pub struct ResumeCommand {
    job_id: String,
    job: Option<WorkflowJob>,
}

impl ResumeCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
        }
    }
}

#[async_trait]
impl Command for ResumeCommand {
    fn name(&self) -> &'static str {
        "resume"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        require_status(self.job.as_ref(), &[WorkflowJobStatus::Suspended])
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "workflow job")?;
        let mut effects = CommandEffects::new();

        job.instance_mut()?.resume()?;
        job.status = WorkflowJobStatus::Running;
        job.last_modified_time = Utc::now();

        for action in ctx.store.list_workflow_actions(&job.id).await? {
            if !action.pending {
                continue;
            }
            if action.status.is_startable() {
                effects.queue(ActionStartCommand::new(&job.id, &action.id));
            } else if action.is_complete() {
                effects.queue(SignalCommand::action(&job.id, &action.id));
            }
        }
        job_transition_effects(&job, &mut effects);

        crate::log_command!(
            info,
            "workflow_resumed",
            command: self.name(),
            entity: self.job_id,
            requeued: effects.follow_ups.len(),
        );
        effects.update(job);
        Ok(effects)
    }
}

#[derive(Debug)]
pub struct KillCommand {
    job_id: String,
    job: Option<WorkflowJob>,
}

impl KillCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
        }
    }
}

#[async_trait]
impl Command for KillCommand {
    fn name(&self) -> &'static str {
        "kill"
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
            Some(job) if job.status.is_terminal() => deferred(
                ErrorCode::E1010,
                format_args!("job [{}] status [{}]", job.id, job.status),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "workflow job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        let instance = job.instance_mut()?;
        instance.kill()?;
        // actions are killed from their persisted status below
        instance.take_actions_to_kill();
        job.status = WorkflowJobStatus::Killed;
        job.end_time = Some(now);
        job.last_modified_time = now;

        for mut action in ctx.store.list_workflow_actions(&job.id).await? {
            match action.status {
                WorkflowActionStatus::Running | WorkflowActionStatus::Done => {
                    action.status = WorkflowActionStatus::Killed;
                    action.set_pending();
                    effects.queue(ActionKillCommand::new(&job.id, &action.id));
                    effects.update(action);
                }
                WorkflowActionStatus::Prep
                | WorkflowActionStatus::StartRetry
                | WorkflowActionStatus::StartManual => {
                    kill_unstarted(&mut action, &job, &mut effects);
                }
                _ => debug!(action_id = %action.id, status = %action.status, "Action already finished"),
            }
        }

        job_transition_effects(&job, &mut effects);
        effects.count(counters::JOBS_KILLED);
        effects.queue(WorkflowEndCommand::new(&job.id));

        crate::log_command!(info, "workflow_killed", command: self.name(), entity: self.job_id,);
        effects.update(job);
        Ok(effects)
    }
}

fn kill_unstarted(action: &mut WorkflowAction, job: &WorkflowJob, effects: &mut CommandEffects) {
    action.status = WorkflowActionStatus::Killed;
    action.reset_pending();
    action.end_time = Some(Utc::now());
    effects.event(JobEvent::workflow_action(action, job));
    effects.update(action.clone());
}
