use async_trait::async_trait;
use chrono::Utc;

use crate::commands::coordinator::CoordSubmitCommand;
use crate::commands::{deferred, loaded};
use crate::constants::counters;
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::ids::JobType;
use crate::models::{BundleAction, BundleJob};
use crate::state_machine::{guards, BundleJobStatus};

/// Persist a PREP bundle and one bundle action per coordinator
#[derive(Debug)]
pub struct BundleSubmitCommand {
    bundle_id: String,
    bundle: Option<BundleJob>,
}

impl BundleSubmitCommand {
    pub fn new(bundle: BundleJob) -> Self {
        Self {
            bundle_id: bundle.id.clone(),
            bundle: Some(bundle),
        }
    }
}

#[async_trait]
impl Command for BundleSubmitCommand {
    fn name(&self) -> &'static str {
        "bundle.submit"
    }

    fn entity_key(&self) -> &str {
        &self.bundle_id
    }

    async fn load_state(&mut self, _ctx: &SystemContext) -> Result<(), CommandError> {
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        Precondition::Ready
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let bundle = loaded(&mut self.bundle, "bundle job")?;
        let mut effects = CommandEffects::new();
        for definition in &bundle.coordinators {
            effects.insert(BundleAction::new(&bundle, &definition.name));
        }
        effects.count(counters::JOBS_SUBMITTED);

        crate::log_command!(
            info,
            "bundle_submitted",
            command: self.name(),
            entity: self.bundle_id,
            coordinators: bundle.coordinators.len(),
        );
        effects.insert(bundle);
        Ok(effects)
    }
}

/// Submit the bundle's coordinators and move it to RUNNING.
///
/// Before the kickoff time the command only re-queues itself for the kickoff.
#[derive(Debug)]
pub struct BundleStartCommand {
    bundle_id: String,
    bundle: Option<BundleJob>,
    actions: Vec<BundleAction>,
}

impl BundleStartCommand {
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            bundle: None,
            actions: Vec::new(),
        }
    }
}

#[async_trait]
impl Command for BundleStartCommand {
    fn name(&self) -> &'static str {
        "bundle.start"
    }

    fn entity_key(&self) -> &str {
        &self.bundle_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.bundle = Some(ctx.store.get_bundle_job(&self.bundle_id).await?);
        self.actions = ctx.store.list_bundle_coordinators(&self.bundle_id).await?;
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.bundle {
            Some(bundle) if bundle.status != BundleJobStatus::Prep => deferred(
                ErrorCode::E1010,
                format_args!("bundle [{}] status [{}]", bundle.id, bundle.status),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut bundle = loaded(&mut self.bundle, "bundle job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        if let Some(wait) = bundle
            .kickoff_time
            .and_then(|kickoff| (kickoff - now).to_std().ok())
            .filter(|wait| !wait.is_zero())
        {
            crate::log_command!(debug, "bundle_kickoff_pending", command: self.name(), entity: self.bundle_id, wait_secs: wait.as_secs(),);
            effects.queue_delayed(BundleStartCommand::new(&bundle.id), wait);
            return Ok(effects);
        }

        for mut action in std::mem::take(&mut self.actions) {
            let mut definition = bundle
                .coordinators
                .iter()
                .find(|definition| definition.name == action.coord_name)
                .cloned()
                .ok_or_else(|| {
                    CommandError::new(
                        ErrorCode::E1020,
                        format!("bundle [{}] has no coordinator [{}]", bundle.id, action.coord_name),
                    )
                })?;
            for (key, value) in &bundle.conf {
                definition.conf.entry(key.clone()).or_insert_with(|| value.clone());
            }

            let coord_id = ctx.ids.next_id(JobType::Coordinator);
            effects.queue(CoordSubmitCommand::new(&coord_id, definition, bundle.user.clone()).with_bundle(&bundle.id));
            action.coord_id = Some(coord_id);
            action.last_modified_time = now;
            effects.update(action);
        }

        guards::bundle_transition(&bundle.id, bundle.status, BundleJobStatus::Running)?;
        bundle.status = BundleJobStatus::Running;
        bundle.start_time = Some(now);
        bundle.last_modified_time = now;
        effects.event(JobEvent::bundle_job(&bundle));
        effects.count(counters::BUNDLES_STARTED);

        crate::log_command!(info, "bundle_started", command: self.name(), entity: self.bundle_id,);
        effects.update(bundle);
        Ok(effects)
    }
}
