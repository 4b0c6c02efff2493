//! Child workflow launch for a coordinator action, and the status update the child
//! reports back on every transition.

use async_trait::async_trait;
use chrono::Utc;

use super::{job_of, CoordActionReadyCommand, CoordStatusTransitCommand};
use crate::commands::workflow::{NotificationCommand, SignalCommand};
use crate::commands::{deferred, loaded, registration};
use crate::constants::{conf, counters};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::ids::JobType;
use crate::models::{CoordinatorAction, CoordinatorJob, WorkflowJob};
use crate::state_machine::{guards, CoordinatorActionStatus, WorkflowJobStatus};
use crate::store::{BeanKind, StoreError};

/// Create the child workflow of a SUBMITTED action and start it
#[derive(Debug)]
pub struct CoordActionStartCommand {
    job_id: String,
    action_id: String,
    job: Option<CoordinatorJob>,
    action: Option<CoordinatorAction>,
}

impl CoordActionStartCommand {
    pub fn new(action_id: impl Into<String>) -> Self {
        let action_id = action_id.into();
        Self {
            job_id: job_of(&action_id),
            action_id,
            job: None,
            action: None,
        }
    }
}

#[async_trait]
impl Command for CoordActionStartCommand {
    fn name(&self) -> &'static str {
        "coord.action.start"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    fn key(&self) -> String {
        format!("{}_{}", self.name(), self.action_id)
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_coordinator_job(&self.job_id).await?);
        self.action = Some(ctx.store.get_coordinator_action(&self.action_id).await?);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.action {
            Some(action) if action.status != CoordinatorActionStatus::Submitted => deferred(
                ErrorCode::E1010,
                format_args!("action [{}] status [{}]", action.id, action.status),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let job = loaded(&mut self.job, "coordinator job")?;
        let mut action = loaded(&mut self.action, "coordinator action")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        let workflow_id = ctx.ids.next_id(JobType::Workflow);
        let mut run_conf = action.run_conf.clone();
        run_conf.insert(conf::PARENT_ID.to_string(), action.id.clone());
        let mut workflow = WorkflowJob::new(
            workflow_id.clone(),
            job.workflow.as_ref().clone(),
            run_conf,
            job.user.clone(),
        );
        workflow.parent_id = Some(action.id.clone());
        workflow.group = job.group.clone();
        if let Some(registration) = registration::workflow_job(&workflow) {
            effects.register_sla(registration);
        }
        effects.insert(workflow);
        effects.count(counters::JOBS_SUBMITTED);
        effects.queue(SignalCommand::start(&workflow_id));

        action.external_id = Some(workflow_id);
        action.status = CoordinatorActionStatus::Running;
        action.last_modified_time = now;
        effects.event(JobEvent::coordinator_action(&action, &job, Some(now), None));

        crate::log_command!(
            info,
            "coordinator_action_started",
            command: self.name(),
            entity: self.action_id,
            workflow_id: action.external_id,
        );
        effects.update(action);
        Ok(effects)
    }
}

/// Mirror the child workflow's status onto its coordinator action
#[derive(Debug)]
pub struct CoordActionUpdateCommand {
    job_id: String,
    action_id: String,
    job: Option<CoordinatorJob>,
    action: Option<CoordinatorAction>,
    workflow: Option<WorkflowJob>,
}

impl CoordActionUpdateCommand {
    pub fn new(action_id: impl Into<String>) -> Self {
        let action_id = action_id.into();
        Self {
            job_id: job_of(&action_id),
            action_id,
            job: None,
            action: None,
            workflow: None,
        }
    }
}

fn action_status(workflow: WorkflowJobStatus) -> CoordinatorActionStatus {
    match workflow {
        WorkflowJobStatus::Prep | WorkflowJobStatus::Running => CoordinatorActionStatus::Running,
        WorkflowJobStatus::Suspended => CoordinatorActionStatus::Suspended,
        WorkflowJobStatus::Succeeded => CoordinatorActionStatus::Succeeded,
        WorkflowJobStatus::Killed => CoordinatorActionStatus::Killed,
        WorkflowJobStatus::Failed => CoordinatorActionStatus::Failed,
    }
}

#[async_trait]
impl Command for CoordActionUpdateCommand {
    fn name(&self) -> &'static str {
        "coord.action.update"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    fn key(&self) -> String {
        format!("{}_{}", self.name(), self.action_id)
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        let action = ctx.store.get_coordinator_action(&self.action_id).await?;
        let workflow_id = action
            .external_id
            .as_deref()
            .ok_or_else(|| StoreError::not_found(BeanKind::WorkflowJob, format!("child of {}", action.id)))?;
        self.workflow = Some(ctx.store.get_workflow_job(workflow_id).await?);
        self.job = Some(ctx.store.get_coordinator_job(&self.job_id).await?);
        self.action = Some(action);
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.action {
            Some(action) if action.status.is_terminal() => deferred(
                ErrorCode::E1010,
                format_args!("action [{}] status [{}]", action.id, action.status),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let job = loaded(&mut self.job, "coordinator job")?;
        let mut action = loaded(&mut self.action, "coordinator action")?;
        let workflow = loaded(&mut self.workflow, "workflow job")?;
        let mut effects = CommandEffects::new();

        let status = action_status(workflow.status);
        action.external_status = Some(workflow.status.to_string());
        action.last_modified_time = Utc::now();
        if status != action.status {
            guards::coordinator_action_transition(&action.id, action.status, status)?;
            action.status = status;
            if status.is_error() {
                action.error_code = workflow.error_code.clone();
                action.error_message = workflow.error_message.clone();
            }
            effects.event(JobEvent::coordinator_action(
                &action,
                &job,
                workflow.start_time,
                workflow.end_time,
            ));
            effects.queue(NotificationCommand::coordinator_action(action.clone()));
            if status.is_terminal() {
                effects.queue(CoordActionReadyCommand::new(&job.id));
                effects.queue(CoordStatusTransitCommand::new(&job.id));
            }
        }

        crate::log_command!(
            debug,
            "coordinator_action_updated",
            command: self.name(),
            entity: self.action_id,
            status: action.status,
            workflow_status: workflow.status,
        );
        effects.update(action);
        Ok(effects)
    }
}
