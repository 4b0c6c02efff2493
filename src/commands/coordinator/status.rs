use async_trait::async_trait;
use chrono::Utc;

use crate::commands::bundle::BundleStatusUpdateCommand;
use crate::commands::{deferred, loaded};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{CoordinatorAction, CoordinatorJob};
use crate::state_machine::{guards, CoordinatorActionStatus, CoordinatorJobStatus};

/// Derive the coordinator job status from its actions.
///
/// Once materialization is done and every action is terminal the job becomes
/// SUCCEEDED, KILLED, FAILED or DONEWITHERROR. Before that a RUNNING job with a failed
/// action moves to RUNNINGWITHERROR.
#[derive(Debug)]
pub struct CoordStatusTransitCommand {
    job_id: String,
    job: Option<CoordinatorJob>,
    actions: Vec<CoordinatorAction>,
}

impl CoordStatusTransitCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
            actions: Vec::new(),
        }
    }
}

/// Final status once every action is terminal
fn final_status(actions: &[CoordinatorAction]) -> CoordinatorJobStatus {
    let all = |pred: fn(CoordinatorActionStatus) -> bool| actions.iter().all(|action| pred(action.status));
    if all(|status| matches!(status, CoordinatorActionStatus::Succeeded | CoordinatorActionStatus::Skipped)) {
        CoordinatorJobStatus::Succeeded
    } else if all(|status| status == CoordinatorActionStatus::Killed) {
        CoordinatorJobStatus::Killed
    } else if all(|status| matches!(status, CoordinatorActionStatus::Failed | CoordinatorActionStatus::TimedOut)) {
        CoordinatorJobStatus::Failed
    } else {
        CoordinatorJobStatus::DoneWithError
    }
}

/// New status for the job, or None when it stays put
fn next_status(job: &CoordinatorJob, actions: &[CoordinatorAction]) -> Option<CoordinatorJobStatus> {
    let all_terminal = actions.iter().all(|action| action.status.is_terminal());
    let next = if job.done_materialization && !job.status.is_suspended() && all_terminal {
        final_status(actions)
    } else if job.status == CoordinatorJobStatus::Running
        && actions.iter().any(|action| action.status.is_error())
    {
        CoordinatorJobStatus::RunningWithError
    } else {
        return None;
    };
    (next != job.status).then_some(next)
}

#[async_trait]
impl Command for CoordStatusTransitCommand {
    fn name(&self) -> &'static str {
        "coord.status.transit"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_coordinator_job(&self.job_id).await?);
        self.actions = ctx.store.list_coordinator_actions(&self.job_id).await?;
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.job {
            Some(job) if job.status.is_terminal() => deferred(
                ErrorCode::E1010,
                format_args!("coordinator [{}] already [{}]", job.id, job.status),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "coordinator job")?;
        let mut effects = CommandEffects::new();

        let Some(status) = next_status(&job, &self.actions) else {
            return Ok(effects);
        };
        guards::coordinator_transition(&job.id, job.status, status)?;
        let previous = job.status;
        job.status = status;
        job.last_modified_time = Utc::now();
        effects.event(JobEvent::coordinator_job(&job));
        if let Some(bundle_id) = &job.bundle_id {
            effects.queue(BundleStatusUpdateCommand::new(bundle_id));
        }

        crate::log_command!(
            info,
            "coordinator_status_changed",
            command: self.name(),
            entity: self.job_id,
            from: previous,
            to: status,
            actions: self.actions.len(),
        );
        effects.update(job);
        Ok(effects)
    }
}
