use async_trait::async_trait;
use chrono::Utc;

use crate::commands::{deferred, loaded};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{BundleAction, BundleJob, CoordinatorJob};
use crate::state_machine::{guards, BundleJobStatus, CoordinatorJobStatus};
use crate::store::StoreResultExt;

/// Refresh each bundle action from its coordinator and roll the statuses up
#[derive(Debug)]
pub struct BundleStatusUpdateCommand {
    bundle_id: String,
    bundle: Option<BundleJob>,
    actions: Vec<BundleAction>,
    coordinators: Vec<CoordinatorJob>,
}

impl BundleStatusUpdateCommand {
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            bundle: None,
            actions: Vec::new(),
            coordinators: Vec::new(),
        }
    }
}

fn rollup(current: BundleJobStatus, statuses: &[CoordinatorJobStatus]) -> BundleJobStatus {
    let all = |wanted: CoordinatorJobStatus| statuses.iter().all(|status| *status == wanted);
    if !statuses.is_empty() && statuses.iter().all(CoordinatorJobStatus::is_terminal) {
        if all(CoordinatorJobStatus::Succeeded) {
            BundleJobStatus::Succeeded
        } else if all(CoordinatorJobStatus::Killed) {
            BundleJobStatus::Killed
        } else if all(CoordinatorJobStatus::Failed) {
            BundleJobStatus::Failed
        } else {
            BundleJobStatus::DoneWithError
        }
    } else if current.is_suspended() || current == BundleJobStatus::Prep {
        current
    } else if statuses.iter().any(|status| {
        matches!(
            status,
            CoordinatorJobStatus::RunningWithError
                | CoordinatorJobStatus::DoneWithError
                | CoordinatorJobStatus::Killed
                | CoordinatorJobStatus::Failed
        )
    }) {
        BundleJobStatus::RunningWithError
    } else {
        BundleJobStatus::Running
    }
}

#[async_trait]
impl Command for BundleStatusUpdateCommand {
    fn name(&self) -> &'static str {
        "bundle.status.update"
    }

    fn entity_key(&self) -> &str {
        &self.bundle_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.bundle = Some(ctx.store.get_bundle_job(&self.bundle_id).await?);
        self.actions = ctx.store.list_bundle_coordinators(&self.bundle_id).await?;
        self.coordinators.clear();
        for coord_id in self.actions.iter().filter_map(|action| action.coord_id.as_deref()) {
            // a coordinator whose submit has not committed yet is simply not counted
            if let Some(job) = ctx.store.get_coordinator_job(coord_id).await.optional()? {
                self.coordinators.push(job);
            }
        }
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.bundle {
            Some(bundle) if bundle.status.is_terminal() => deferred(
                ErrorCode::E1010,
                format_args!("bundle [{}] already [{}]", bundle.id, bundle.status),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut bundle = loaded(&mut self.bundle, "bundle job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        let mut statuses = Vec::with_capacity(self.actions.len());
        for mut action in std::mem::take(&mut self.actions) {
            let reported = action.coord_id.as_deref().and_then(|coord_id| {
                self.coordinators
                    .iter()
                    .find(|job| job.id == coord_id)
                    .map(|job| job.status)
            });
            match reported {
                Some(status) => {
                    statuses.push(status);
                    if status != action.status {
                        action.status = status;
                        action.last_modified_time = now;
                        effects.update(action);
                    }
                }
                // not yet submitted or not yet visible: still open
                None => statuses.push(CoordinatorJobStatus::Prep),
            }
        }

        let status = rollup(bundle.status, &statuses);
        if status != bundle.status {
            guards::bundle_transition(&bundle.id, bundle.status, status)?;
            crate::log_command!(
                info,
                "bundle_status_changed",
                command: self.name(),
                entity: self.bundle_id,
                from: bundle.status,
                to: status,
            );
            bundle.status = status;
            if status.is_terminal() {
                bundle.end_time = Some(now);
            }
            bundle.last_modified_time = now;
            effects.event(JobEvent::bundle_job(&bundle));
            effects.update(bundle);
        }
        Ok(effects)
    }
}
