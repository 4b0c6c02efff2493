use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::debug;

use super::SignalCommand;
use crate::commands::{loaded, registration};
use crate::constants::vars;
use crate::error::CommandError;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{JobConf, WorkflowAction, WorkflowJob};
use crate::state_machine::{guards, WorkflowActionStatus, WorkflowJobStatus};
use crate::store::BeanKind;

/// Re-run a finished workflow, skipping nodes that already succeeded.
///
/// Actions for skipped nodes that ended OK are kept and signalled straight through when
/// the new run reaches them; every other action is deleted and runs again.
#[derive(Debug)]
pub struct ReRunCommand {
    job_id: String,
    skip_nodes: BTreeSet<String>,
    conf: JobConf,
    job: Option<WorkflowJob>,
    actions: Vec<WorkflowAction>,
}

impl ReRunCommand {
    pub fn new(job_id: impl Into<String>, skip_nodes: impl IntoIterator<Item = String>, conf: JobConf) -> Self {
        Self {
            job_id: job_id.into(),
            skip_nodes: skip_nodes.into_iter().collect(),
            conf,
            job: None,
            actions: Vec::new(),
        }
    }
}

#[async_trait]
impl Command for ReRunCommand {
    fn name(&self) -> &'static str {
        "rerun"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_workflow_job(&self.job_id).await?);
        self.actions = ctx.store.list_workflow_actions(&self.job_id).await?;
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        Precondition::Ready
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "workflow job")?;
        guards::workflow_rerun(&job.id, job.status)?;
        let mut effects = CommandEffects::new();

        let mut skipped = Vec::new();
        for action in std::mem::take(&mut self.actions) {
            let keep = !action.is_control_node()
                && action.status == WorkflowActionStatus::Ok
                && self.skip_nodes.contains(&action.name);
            if keep {
                skipped.push(action.name);
            } else {
                effects.batch.delete(BeanKind::WorkflowAction, action.id);
            }
        }

        job.reset_instance();
        let instance = job.instance_mut()?;
        for node in &skipped {
            instance.set_var(&vars::skip_var(node), "true");
        }
        job.status = WorkflowJobStatus::Prep;
        job.run += 1;
        job.start_time = None;
        job.end_time = None;
        job.error_code = None;
        job.error_message = None;
        job.last_modified_time = Utc::now();
        job.conf.extend(std::mem::take(&mut self.conf));

        if let Some(registration) = registration::workflow_job(&job) {
            effects.update_sla(registration);
        }
        effects.queue(SignalCommand::start(&job.id));

        debug!(job_id = %job.id, skipped = ?skipped, "Actions kept for skip");
        crate::log_command!(info, "workflow_rerun", command: self.name(), entity: self.job_id, run: job.run,);
        effects.update(job);
        Ok(effects)
    }
}
