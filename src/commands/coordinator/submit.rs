use async_trait::async_trait;

use super::CoordMaterializeCommand;
use crate::commands::loaded;
use crate::constants::counters;
use crate::error::CommandError;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{CoordinatorDefinition, CoordinatorJob};

/// Persist a new PREP coordinator job and queue its first materialization
#[derive(Debug)]
pub struct CoordSubmitCommand {
    job_id: String,
    definition: Option<CoordinatorDefinition>,
    user: String,
    bundle_id: Option<String>,
}

impl CoordSubmitCommand {
    pub fn new(job_id: impl Into<String>, definition: CoordinatorDefinition, user: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            definition: Some(definition),
            user: user.into(),
            bundle_id: None,
        }
    }

    pub fn with_bundle(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }
}

#[async_trait]
impl Command for CoordSubmitCommand {
    fn name(&self) -> &'static str {
        "coord.submit"
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
        let definition = loaded(&mut self.definition, "coordinator definition")?;
        let mut job = CoordinatorJob::from_definition(self.job_id.clone(), definition, self.user.clone());
        job.bundle_id = self.bundle_id.clone();

        crate::log_command!(
            info,
            "coordinator_submitted",
            command: self.name(),
            entity: self.job_id,
            frequency: job.frequency,
            time_unit: job.time_unit,
            bundle_id: job.bundle_id,
        );
        let mut effects = CommandEffects::new();
        effects.queue(CoordMaterializeCommand::new(&job.id));
        effects.count(counters::JOBS_SUBMITTED);
        effects.insert(job);
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::coordinator::test_support::hourly;
    use crate::commands::test_support::{context, follow_up_names, run};
    use crate::state_machine::CoordinatorJobStatus;
    use crate::store::EntityStore;

    #[tokio::test]
    async fn test_submit_persists_prep_coordinator() {
        let (ctx, store) = context();
        let mut command = CoordSubmitCommand::new("c-C", hourly(3), "alice").with_bundle("b-B");
        let effects = run(&ctx, &mut command).await.unwrap();
        assert_eq!(follow_up_names(&effects), vec!["coord.materialize"]);

        let job = store.get_coordinator_job("c-C").await.unwrap();
        assert_eq!(job.status, CoordinatorJobStatus::Prep);
        assert_eq!(job.bundle_id.as_deref(), Some("b-B"));
        assert_eq!(job.next_materialized_time, Some(job.start_time));
    }
}
