use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{job_of, CoordActionStartCommand, CoordStatusTransitCommand};
use crate::commands::{deferred, loaded};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{CoordinatorAction, CoordinatorJob, ExecutionOrder};
use crate::state_machine::{CoordinatorActionStatus, CoordinatorJobStatus};

/// Check a WAITING action's input dependencies; READY once none are missing
#[derive(Debug)]
pub struct CoordActionInputCheckCommand {
    job_id: String,
    action_id: String,
    job: Option<CoordinatorJob>,
    action: Option<CoordinatorAction>,
}

impl CoordActionInputCheckCommand {
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
impl Command for CoordActionInputCheckCommand {
    fn name(&self) -> &'static str {
        "coord.action.input.check"
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
        let (Some(job), Some(action)) = (&self.job, &self.action) else {
            return Precondition::Ready;
        };
        if action.status != CoordinatorActionStatus::Waiting {
            return deferred(
                ErrorCode::E1010,
                format_args!("action [{}] status [{}]", action.id, action.status),
            );
        }
        if job.status.is_suspended() || job.status.is_terminal() {
            return deferred(
                ErrorCode::E1010,
                format_args!("coordinator [{}] status [{}]", job.id, job.status),
            );
        }
        Precondition::Ready
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let job = loaded(&mut self.job, "coordinator job")?;
        let mut action = loaded(&mut self.action, "coordinator action")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();
        action.last_modified_time = now;

        if action.is_timed_out(now) {
            action.status = CoordinatorActionStatus::TimedOut;
            action.error_message = Some(format!(
                "missing dependencies after {} minutes: {}",
                action.timeout_mins,
                action.missing_dependencies.join(",")
            ));
            effects.event(JobEvent::coordinator_action(&action, &job, None, Some(now)));
            effects.queue(CoordStatusTransitCommand::new(&job.id));
        } else {
            action.missing_dependencies = ctx
                .dependency_checker
                .missing(&action, &action.missing_dependencies)
                .await;
            if action.missing_dependencies.is_empty() {
                action.status = CoordinatorActionStatus::Ready;
                effects.queue(CoordActionReadyCommand::new(&job.id));
            } else {
                debug!(
                    action_id = %action.id,
                    missing = action.missing_dependencies.len(),
                    "Input dependencies outstanding"
                );
                effects.queue_delayed(
                    CoordActionInputCheckCommand::new(&action.id),
                    ctx.config.coordinator.input_check_interval(),
                );
            }
        }

        crate::log_command!(
            debug,
            "coordinator_action_checked",
            command: self.name(),
            entity: self.action_id,
            status: action.status,
        );
        effects.update(action);
        Ok(effects)
    }
}

/// Move READY actions into free concurrency slots in execution order
#[derive(Debug)]
pub struct CoordActionReadyCommand {
    job_id: String,
    job: Option<CoordinatorJob>,
    actions: Vec<CoordinatorAction>,
}

impl CoordActionReadyCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
            actions: Vec::new(),
        }
    }
}

#[async_trait]
impl Command for CoordActionReadyCommand {
    fn name(&self) -> &'static str {
        "coord.action.ready"
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
            Some(job)
                if !matches!(
                    job.status,
                    CoordinatorJobStatus::Running | CoordinatorJobStatus::RunningWithError
                ) =>
            {
                deferred(
                    ErrorCode::E1010,
                    format_args!("coordinator [{}] status [{}]", job.id, job.status),
                )
            }
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let job = loaded(&mut self.job, "coordinator job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        let actions = std::mem::take(&mut self.actions);
        let running = actions
            .iter()
            .filter(|action| action.status.occupies_slot())
            .count();
        let mut ready: Vec<CoordinatorAction> = actions
            .into_iter()
            .filter(|action| action.status == CoordinatorActionStatus::Ready)
            .collect();
        ready.sort_by_key(|action| action.action_number);

        let mut skipped = 0;
        match job.execution_order {
            ExecutionOrder::Fifo => {}
            ExecutionOrder::Lifo => ready.reverse(),
            ExecutionOrder::LastOnly => {
                let last = ready.pop();
                for mut superseded in ready.drain(..) {
                    superseded.status = CoordinatorActionStatus::Skipped;
                    superseded.last_modified_time = now;
                    effects.update(superseded);
                    skipped += 1;
                }
                ready.extend(last);
            }
        }

        let slots = if job.has_unlimited_concurrency() {
            usize::MAX
        } else {
            usize::try_from(job.concurrency)
                .unwrap_or_default()
                .saturating_sub(running)
        };
        let mut started = 0;
        for mut action in ready.into_iter().take(slots) {
            action.status = CoordinatorActionStatus::Submitted;
            action.last_modified_time = now;
            effects.queue(CoordActionStartCommand::new(&action.id));
            effects.update(action);
            started += 1;
        }
        if skipped > 0 {
            effects.queue(CoordStatusTransitCommand::new(&job.id));
        }

        crate::log_command!(
            debug,
            "coordinator_actions_ready",
            command: self.name(),
            entity: self.job_id,
            running: running,
            submitted: started,
            skipped: skipped,
        );
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::coordinator::test_support::{hourly, seed_actions, seed_job, update_job};
    use crate::commands::test_support::{context, follow_up_keys, run};
    use crate::execution::StaticDependencyChecker;
    use crate::store::{EntityStore, InMemoryEntityStore, WriteBatch};
    use std::sync::Arc;
    use std::time::Duration;
    use crate::state_machine::CoordinatorActionStatus::*;

    async fn running_job(store: &InMemoryEntityStore, order: ExecutionOrder, concurrency: i32) -> CoordinatorJob {
        let mut definition = hourly(10);
        definition.execution_order = order;
        definition.concurrency = concurrency;
        let mut job = seed_job(store, definition).await;
        job.status = CoordinatorJobStatus::Running;
        update_job(store, job.clone()).await;
        job
    }

    async fn statuses(store: &InMemoryEntityStore) -> Vec<CoordinatorActionStatus> {
        store
            .list_coordinator_actions("c-C")
            .await
            .unwrap()
            .into_iter()
            .map(|action| action.status)
            .collect()
    }

    #[tokio::test]
    async fn test_missing_dependency_requeues_then_ready() {
        let checker = Arc::new(StaticDependencyChecker::new());
        let (ctx, store) = context();
        let ctx = ctx.with_dependency_checker(checker.clone());
        let mut definition = hourly(2);
        definition.input_dependencies = vec!["/data/2026-01-01".to_string()];
        let mut job = seed_job(&store, definition).await;
        job.status = CoordinatorJobStatus::Running;
        update_job(&store, job.clone()).await;
        seed_actions(&store, &job, &[Waiting]).await;

        let effects = run(&ctx, &mut CoordActionInputCheckCommand::new("c-C@1")).await.unwrap();
        assert_eq!(statuses(&store).await, vec![Waiting]);
        assert_eq!(effects.follow_ups[0].delay, Duration::from_millis(60_000));

        checker.publish("/data/2026-01-01");
        let effects = run(&ctx, &mut CoordActionInputCheckCommand::new("c-C@1")).await.unwrap();
        assert_eq!(statuses(&store).await, vec![Ready]);
        assert_eq!(follow_up_keys(&effects), vec!["coord.action.ready_c-C".to_string()]);
    }

    #[tokio::test]
    async fn test_timed_out_action() {
        let (ctx, store) = context();
        let mut definition = hourly(2);
        definition.timeout_mins = 5;
        let job = seed_job(&store, definition).await;
        let mut action = CoordinatorAction::new(&job, 1, job.start_time);
        action.created_time = Utc::now() - chrono::Duration::minutes(10);
        let mut batch = WriteBatch::new();
        batch.insert(action);
        store.execute_batch(batch).await.unwrap();

        let effects = run(&ctx, &mut CoordActionInputCheckCommand::new("c-C@1")).await.unwrap();
        assert_eq!(statuses(&store).await, vec![TimedOut]);
        assert_eq!(effects.events.len(), 1);
    }

    #[tokio::test]
    async fn test_fifo_fills_free_slots_oldest_first() {
        let (ctx, store) = context();
        let job = running_job(&store, ExecutionOrder::Fifo, 2).await;
        seed_actions(&store, &job, &[Running, Ready, Ready, Ready]).await;

        let effects = run(&ctx, &mut CoordActionReadyCommand::new("c-C")).await.unwrap();
        assert_eq!(statuses(&store).await, vec![Running, Submitted, Ready, Ready]);
        assert_eq!(follow_up_keys(&effects), vec!["coord.action.start_c-C@2".to_string()]);
    }

    #[tokio::test]
    async fn test_lifo_starts_newest_first() {
        let (ctx, store) = context();
        let job = running_job(&store, ExecutionOrder::Lifo, 1).await;
        seed_actions(&store, &job, &[Ready, Ready, Ready]).await;

        run(&ctx, &mut CoordActionReadyCommand::new("c-C")).await.unwrap();
        assert_eq!(statuses(&store).await, vec![Ready, Ready, Submitted]);
    }

    #[tokio::test]
    async fn test_last_only_skips_superseded_actions() {
        let (ctx, store) = context();
        let job = running_job(&store, ExecutionOrder::LastOnly, -1).await;
        seed_actions(&store, &job, &[Ready, Ready, Ready]).await;

        run(&ctx, &mut CoordActionReadyCommand::new("c-C")).await.unwrap();
        assert_eq!(statuses(&store).await, vec![Skipped, Skipped, Submitted]);
    }

    #[tokio::test]
    async fn test_ready_waits_while_coordinator_suspended() {
        let (ctx, store) = context();
        let mut job = running_job(&store, ExecutionOrder::Fifo, 1).await;
        job.status = CoordinatorJobStatus::Suspended;
        update_job(&store, job).await;

        let reason = run(&ctx, &mut CoordActionReadyCommand::new("c-C")).await.unwrap_err();
        assert!(reason.starts_with("E1010"), "{reason}");
    }
}
