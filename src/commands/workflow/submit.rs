use async_trait::async_trait;

use crate::commands::registration;
use crate::constants::counters;
use crate::error::CommandError;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::instance::WorkflowApp;
use crate::models::{JobConf, WorkflowJob};

/// Persist a new PREP workflow job and register its job-level SLA
#[derive(Debug)]
pub struct SubmitCommand {
    job_id: String,
    app: Option<WorkflowApp>,
    conf: JobConf,
    user: String,
    parent_id: Option<String>,
}

impl SubmitCommand {
    pub fn new(job_id: impl Into<String>, app: WorkflowApp, conf: JobConf, user: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            app: Some(app),
            conf,
            user: user.into(),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

#[async_trait]
impl Command for SubmitCommand {
    fn name(&self) -> &'static str {
        "submit"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    async fn load_state(&mut self, _ctx: &SystemContext) -> Result<(), CommandError> {
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        Precondition::Ready
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let app = crate::commands::loaded(&mut self.app, "workflow definition")?;
        let mut job = WorkflowJob::new(self.job_id.clone(), app, self.conf.clone(), self.user.clone());
        job.parent_id = self.parent_id.clone();

        let mut effects = CommandEffects::new();
        if let Some(registration) = registration::workflow_job(&job) {
            effects.register_sla(registration);
        }
        effects.insert(job);
        effects.count(counters::JOBS_SUBMITTED);

        crate::log_command!(info, "workflow_submitted", command: self.name(), entity: self.job_id, user: self.user,);
        Ok(effects)
    }
}
