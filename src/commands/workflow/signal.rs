//! # Signal
//!
//! Advances a workflow either from PREP (start) or after one of its actions completed.
//!
//! With no action the instance is started, the job moves to RUNNING and the SLAs of
//! every action node are registered. With an action that is complete and pending, the
//! instance is signalled with the action's signal value. If the workflow finished, the
//! actions the instance wants killed or failed are updated and the job takes the
//! instance's end status; otherwise every node the instance entered is materialized as
//! a new action and started, or, for nodes marked to be skipped by a re-run, signalled
//! straight through.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{ActionKillCommand, ActionStartCommand, NotificationCommand, WorkflowEndCommand};
use crate::commands::coordinator::CoordActionUpdateCommand;
use crate::commands::{deferred, loaded, registration};
use crate::constants::{conf, counters, vars};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::instance::{resolve_template, NodeKind, TemplateContext};
use crate::models::{WorkflowAction, WorkflowJob};
use crate::state_machine::{WorkflowActionStatus, WorkflowJobStatus};
use crate::store::{StoreResultExt, UpdateQuery};

#[derive(Debug)]
pub struct SignalCommand {
    job_id: String,
    action_id: Option<String>,
    job: Option<WorkflowJob>,
    action: Option<WorkflowAction>,
}

impl SignalCommand {
    /// Start a PREP workflow
    pub fn start(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            action_id: None,
            job: None,
            action: None,
        }
    }

    /// Advance past a completed action
    pub fn action(job_id: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            action_id: Some(action_id.into()),
            job: None,
            action: None,
        }
    }
}

/// What the instance did in response to start or signal
struct Advance {
    completed: bool,
    status_changed: bool,
    skip_action: bool,
}

#[async_trait]
impl Command for SignalCommand {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    fn key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.name(),
            self.job_id,
            self.action_id.as_deref().unwrap_or_default()
        )
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        if let Some(action_id) = &self.action_id {
            self.action = Some(ctx.store.get_workflow_action(action_id).await?);
        }
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        let Some(job) = &self.job else {
            return Precondition::Ready;
        };
        match &self.action {
            Some(action) if !(action.is_complete() && action.pending) => deferred(
                ErrorCode::E0814,
                format_args!(
                    "action [{}] status [{}] pending [{}]",
                    action.id, action.status, action.pending
                ),
            ),
            _ if !matches!(job.status, WorkflowJobStatus::Running | WorkflowJobStatus::Prep) => {
                deferred(ErrorCode::E0813, format_args!("current state [{}]", job.status))
            }
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "workflow job")?;
        let mut action = self.action.take();
        let mut effects = CommandEffects::new();
        let now = Utc::now();
        let mut notify_actions: Vec<WorkflowAction> = Vec::new();

        let advance = match action.as_mut() {
            None => self.start_job(ctx, &mut job, &mut effects).await?,
            Some(action) => {
                let advance = signal_job(&mut job, action)?;
                if !advance.skip_action {
                    notify_actions.push(action.clone());
                }
                advance
            }
        };
        let mut generate_event = advance.status_changed;
        let mut action_update = UpdateQuery::WorkflowActionPendingTransition;
        let mut job_error: Option<(Option<String>, Option<String>)> = None;

        if advance.completed {
            let instance = job.instance_mut()?;
            let to_kill = instance.take_actions_to_kill();
            let to_fail = instance.take_actions_to_fail();
            let end_status = WorkflowJobStatus::from(instance.status());

            for node in to_kill {
                let action_id = job.action_id(&node);
                let mut to_kill = ctx.store.get_workflow_action(&action_id).await?;
                to_kill.set_pending();
                to_kill.status = WorkflowActionStatus::Killed;
                effects.update(to_kill.clone());
                effects.queue(ActionKillCommand::new(&job.id, &to_kill.id));
            }

            for node in to_fail {
                let action_id = job.action_id(&node);
                let failed = match action.as_mut() {
                    Some(current) if current.id == action_id => {
                        current.reset_pending();
                        current.status = WorkflowActionStatus::Failed;
                        action_update = UpdateQuery::Full;
                        current.clone()
                    }
                    _ => {
                        let mut stored = ctx.store.get_workflow_action(&action_id).await?;
                        stored.reset_pending();
                        stored.status = WorkflowActionStatus::Failed;
                        effects.update(stored.clone());
                        stored
                    }
                };
                // the last failed action decides the job's error, even when it has none
                job_error = Some((failed.error_code.clone(), failed.error_message.clone()));
                effects.event(JobEvent::workflow_action(&failed, &job));
                notify_actions.push(failed);
            }

            job.status = end_status;
            job.end_time = Some(now);
            generate_event = true;
            match job.status {
                WorkflowJobStatus::Succeeded => effects.count(counters::JOBS_SUCCEEDED),
                WorkflowJobStatus::Killed => effects.count(counters::JOBS_KILLED),
                WorkflowJobStatus::Failed => effects.count(counters::JOBS_FAILED),
                _ => {}
            }

            if let Some(current) = action.as_mut() {
                if resolve_kill_message(ctx, &job, current).await? {
                    action_update = UpdateQuery::Full;
                }
            }
        } else {
            self.materialize_started(ctx, &mut job, &mut effects, &mut generate_event)
                .await?;
        }

        if let Some(current) = action {
            effects.update_with(action_update, current);
        }
        if let Some((code, message)) = job_error {
            job.error_code = code;
            job.error_message = message;
        }
        job.last_modified_time = now;
        if generate_event {
            effects.event(JobEvent::workflow_job(&job));
        }
        for notified in notify_actions {
            effects.queue(NotificationCommand::action(job.clone(), notified));
        }
        if generate_event {
            effects.queue(NotificationCommand::job(job.clone()));
        }
        if !job.status.is_active() {
            if let Some(parent_id) = &job.parent_id {
                effects.queue(CoordActionUpdateCommand::new(parent_id));
            }
            effects.queue(WorkflowEndCommand::new(&job.id));
        }

        crate::log_command!(
            debug,
            "workflow_signalled",
            command: self.name(),
            entity: self.job_id,
            action_id: self.action_id,
            status: job.status,
            completed: advance.completed,
        );
        effects.update(job);
        Ok(effects)
    }
}

impl SignalCommand {
    async fn start_job(
        &self,
        ctx: &SystemContext,
        job: &mut WorkflowJob,
        effects: &mut CommandEffects,
    ) -> Result<Advance, CommandError> {
        if job.status != WorkflowJobStatus::Prep {
            return Err(CommandError::new(
                ErrorCode::E0801,
                format!("job [{}] status [{}]", job.id, job.status),
            ));
        }
        let completed = job.instance_mut()?.start()?;
        let now = Utc::now();
        job.status = WorkflowJobStatus::Running;
        job.start_time = Some(now);
        for registration in registration::workflow_actions(job, now) {
            // a re-run replaces the registration of an action reached by an earlier run
            let exists = job.run > 0
                && ctx
                    .store
                    .get_sla_registration(&registration.id)
                    .await
                    .optional()?
                    .is_some();
            if exists {
                effects.update_sla(registration);
            } else {
                effects.register_sla(registration);
            }
        }
        Ok(Advance {
            completed,
            status_changed: true,
            skip_action: false,
        })
    }

    /// Insert and start every node the instance entered, unless already persisted
    async fn materialize_started(
        &self,
        ctx: &SystemContext,
        job: &mut WorkflowJob,
        effects: &mut CommandEffects,
        generate_event: &mut bool,
    ) -> Result<(), CommandError> {
        let started = job.instance_mut()?.take_started();
        for node in started {
            let skip = job.instance()?.var(&vars::skip_var(&node.name)) == Some("true");
            let action_id = job.action_id(&node.name);

            if skip {
                let mut skipped = ctx.store.get_workflow_action(&action_id).await?;
                skipped.set_pending();
                effects.update_with(UpdateQuery::WorkflowActionPendingTransition, skipped);
                effects.queue(SignalCommand::action(&job.id, &action_id));
                continue;
            }

            // a node reached twice is only inserted once
            if ctx.store.get_workflow_action(&action_id).await.optional()?.is_some() {
                debug!(job_id = %job.id, action_id = %action_id, "Action already materialized");
                continue;
            }

            let mut new_action = WorkflowAction::from_started(&job.id, node);
            if suspend_on_node(job, &new_action.name) {
                job.instance_mut()?.suspend()?;
                job.status = WorkflowJobStatus::Suspended;
                *generate_event = true;
                debug!(job_id = %job.id, node = %new_action.name, "Suspending on node");
            }
            new_action.set_pending();
            new_action.created_time = Utc::now();
            effects.queue(ActionStartCommand::new(&job.id, &new_action.id));
            effects.insert(new_action);
        }
        Ok(())
    }
}

/// Signal the instance with the action's completion value
fn signal_job(job: &mut WorkflowJob, action: &mut WorkflowAction) -> Result<Advance, CommandError> {
    let signal_value = action.signal_value.clone().unwrap_or_default();
    let instance = job.instance_mut()?;
    let initial = instance.status();
    let skip_action = instance.var(&vars::skip_var(&action.name)) == Some("true");

    let completed = match instance.signal(&action.execution_path, &signal_value) {
        Ok(completed) => completed,
        Err(err) => {
            warn!(job_id = %action.job_id, action_id = %action.id, error = %err, "Workflow signal failed");
            true
        }
    };
    let end = instance.status();
    if !skip_action {
        action.transition = instance.transition(&action.name).map(str::to_string);
    }
    action.reset_pending();
    if completed {
        job.status = WorkflowJobStatus::from(end);
    }
    Ok(Advance {
        completed,
        status_changed: end != initial,
        skip_action,
    })
}

fn suspend_on_node(job: &WorkflowJob, node: &str) -> bool {
    job.conf
        .get(conf::SUSPEND_ON_NODES)
        .is_some_and(|nodes| nodes.split(',').any(|name| name.trim() == node || name.trim() == "*"))
}

/// Attach the resolved kill-node message to the action; `true` if it was a kill node
async fn resolve_kill_message(
    ctx: &SystemContext,
    job: &WorkflowJob,
    action: &mut WorkflowAction,
) -> Result<bool, CommandError> {
    let instance = job.instance()?;
    let Some(NodeKind::Kill { message }) = instance.node(&action.name).map(|node| &node.kind) else {
        return Ok(false);
    };

    let actions = ctx.store.list_workflow_actions(&job.id).await?;
    let mut node_errors = BTreeMap::new();
    let mut last_error: Option<&WorkflowAction> = None;
    for candidate in &actions {
        if let Some(code) = &candidate.error_code {
            node_errors.insert(
                candidate.name.clone(),
                (code.clone(), candidate.error_message.clone().unwrap_or_default()),
            );
            if last_error.map_or(true, |last| candidate.end_time >= last.end_time) {
                last_error = Some(candidate);
            }
        }
    }
    let template = TemplateContext {
        job_id: &job.id,
        app_name: &job.app_name,
        user: &job.user,
        vars: Some(instance.vars()),
        conf: Some(&job.conf),
        last_error_node: last_error.map(|last| last.name.as_str()),
        node_errors,
    };
    let resolved = resolve_template(message, &template).map_err(|err| {
        warn!(job_id = %job.id, action_id = %action.id, error = %err, "Kill node message unresolved");
        CommandError::new(ErrorCode::E0729, format!("{}: {err}", action.name))
    })?;
    debug!(job_id = %job.id, action_id = %action.id, before = %message, after = %resolved, "Resolved kill node message");

    let code = action
        .error_code
        .clone()
        .unwrap_or_else(|| ErrorCode::E0729.to_string());
    action.set_error(code, resolved);
    Ok(true)
}
