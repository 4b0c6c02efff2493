//! User-initiated bundle transitions, cascaded to every open coordinator.

use async_trait::async_trait;
use chrono::Utc;

use super::open_coordinators;
use crate::commands::coordinator::{CoordKillCommand, CoordResumeCommand, CoordSuspendCommand};
use crate::commands::{deferred, loaded};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{BundleAction, BundleJob};
use crate::state_machine::{guards, BundleJobStatus, CoordinatorJobStatus};

fn invalid_status(bundle: &BundleJob) -> Precondition {
    deferred(
        ErrorCode::E1010,
        format_args!("bundle [{}] status [{}]", bundle.id, bundle.status),
    )
}

macro_rules! bundle_command {
    ($name:ident) => {
        #[derive(Debug)]
        pub struct $name {
            bundle_id: String,
            bundle: Option<BundleJob>,
            actions: Vec<BundleAction>,
        }

        impl $name {
            pub fn new(bundle_id: impl Into<String>) -> Self {
                Self {
                    bundle_id: bundle_id.into(),
                    bundle: None,
                    actions: Vec::new(),
                }
            }

            async fn load(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
                self.bundle = Some(ctx.store.get_bundle_job(&self.bundle_id).await?);
                self.actions = ctx.store.list_bundle_coordinators(&self.bundle_id).await?;
                Ok(())
            }
        }
    };
}

bundle_command!(BundleSuspendCommand);
bundle_command!(BundleResumeCommand);
bundle_command!(BundleKillCommand);

#[async_trait]
impl Command for BundleSuspendCommand {
    fn name(&self) -> &'static str {
        "bundle.suspend"
    }

    fn entity_key(&self) -> &str {
        &self.bundle_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.load(ctx).await
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.bundle {
            Some(bundle) if bundle.status.is_terminal() || bundle.status.is_suspended() => {
                invalid_status(bundle)
            }
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut bundle = loaded(&mut self.bundle, "bundle job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        let status = if bundle.status == BundleJobStatus::Prep {
            BundleJobStatus::PrepSuspended
        } else {
            BundleJobStatus::Suspended
        };
        guards::bundle_transition(&bundle.id, bundle.status, status)?;
        bundle.status = status;
        bundle.suspended_time = Some(now);
        bundle.last_modified_time = now;
        for coord_id in open_coordinators(&self.actions) {
            effects.queue(CoordSuspendCommand::new(coord_id));
        }
        effects.event(JobEvent::bundle_job(&bundle));

        crate::log_command!(info, "bundle_suspended", command: self.name(), entity: self.bundle_id, status: bundle.status,);
        effects.update(bundle);
        Ok(effects)
    }
}

#[async_trait]
impl Command for BundleResumeCommand {
    fn name(&self) -> &'static str {
        "bundle.resume"
    }

    fn entity_key(&self) -> &str {
        &self.bundle_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.load(ctx).await
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.bundle {
            Some(bundle) if !bundle.status.is_suspended() => invalid_status(bundle),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut bundle = loaded(&mut self.bundle, "bundle job")?;
        let mut effects = CommandEffects::new();

        bundle.status = if bundle.status == BundleJobStatus::PrepSuspended {
            BundleJobStatus::Prep
        } else {
            BundleJobStatus::Running
        };
        bundle.suspended_time = None;
        bundle.last_modified_time = Utc::now();
        for coord_id in open_coordinators(&self.actions) {
            effects.queue(CoordResumeCommand::new(coord_id));
        }
        effects.event(JobEvent::bundle_job(&bundle));

        crate::log_command!(info, "bundle_resumed", command: self.name(), entity: self.bundle_id, status: bundle.status,);
        effects.update(bundle);
        Ok(effects)
    }
}

#[async_trait]
impl Command for BundleKillCommand {
    fn name(&self) -> &'static str {
        "bundle.kill"
    }

    fn entity_key(&self) -> &str {
        &self.bundle_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.load(ctx).await
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.bundle {
            Some(bundle) if bundle.status.is_terminal() => invalid_status(bundle),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut bundle = loaded(&mut self.bundle, "bundle job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        guards::bundle_transition(&bundle.id, bundle.status, BundleJobStatus::Killed)?;
        bundle.status = BundleJobStatus::Killed;
        bundle.end_time = Some(now);
        bundle.last_modified_time = now;
        for coord_id in open_coordinators(&self.actions) {
            effects.queue(CoordKillCommand::new(coord_id));
        }
        // never-submitted coordinators have nothing to cascade to
        for mut action in std::mem::take(&mut self.actions) {
            if action.coord_id.is_none() {
                action.status = CoordinatorJobStatus::Killed;
                action.last_modified_time = now;
                effects.update(action);
            }
        }
        effects.event(JobEvent::bundle_job(&bundle));

        crate::log_command!(info, "bundle_killed", command: self.name(), entity: self.bundle_id,);
        effects.update(bundle);
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::bundle::test_support::{bundle, seed_running};
    use crate::commands::bundle::BundleSubmitCommand;
    use crate::commands::test_support::{context, follow_up_keys, run};
    use crate::store::EntityStore;

    #[tokio::test]
    async fn test_suspend_and_resume_cascade_to_open_coordinators() {
        let (ctx, store) = context();
        seed_running(&store, &[CoordinatorJobStatus::Running, CoordinatorJobStatus::Succeeded]).await;

        let effects = run(&ctx, &mut BundleSuspendCommand::new("b-B")).await.unwrap();
        assert_eq!(follow_up_keys(&effects), vec!["coord.suspend_c-1".to_string()]);
        let suspended = store.get_bundle_job("b-B").await.unwrap();
        assert_eq!(suspended.status, BundleJobStatus::Suspended);
        assert!(suspended.suspended_time.is_some());

        let effects = run(&ctx, &mut BundleResumeCommand::new("b-B")).await.unwrap();
        assert_eq!(follow_up_keys(&effects), vec!["coord.resume_c-1".to_string()]);
        assert_eq!(
            store.get_bundle_job("b-B").await.unwrap().status,
            BundleJobStatus::Running
        );
    }

    #[tokio::test]
    async fn test_kill_prep_bundle_closes_unsubmitted_coordinators() {
        let (ctx, store) = context();
        run(&ctx, &mut BundleSubmitCommand::new(bundle())).await.unwrap();

        let effects = run(&ctx, &mut BundleKillCommand::new("b-B")).await.unwrap();
        assert!(effects.follow_ups.is_empty());
        let killed = store.get_bundle_job("b-B").await.unwrap();
        assert_eq!(killed.status, BundleJobStatus::Killed);
        assert!(killed.end_time.is_some());
        assert!(store
            .list_bundle_coordinators("b-B")
            .await
            .unwrap()
            .iter()
            .all(|action| action.status == CoordinatorJobStatus::Killed));

        let reason = run(&ctx, &mut BundleKillCommand::new("b-B")).await.unwrap_err();
        assert!(reason.starts_with("E1010"), "{reason}");
    }

    #[tokio::test]
    async fn test_kill_running_bundle_kills_coordinators() {
        let (ctx, store) = context();
        seed_running(&store, &[CoordinatorJobStatus::Running, CoordinatorJobStatus::RunningWithError]).await;

        let effects = run(&ctx, &mut BundleKillCommand::new("b-B")).await.unwrap();
        assert_eq!(
            follow_up_keys(&effects),
            vec!["coord.kill_c-1".to_string(), "coord.kill_c-2".to_string()]
        );
    }
}
