//! Coordinator action materialization and the background task that drives it.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::{CoordActionInputCheckCommand, CoordStatusTransitCommand};
use crate::commands::{deferred, loaded, registration};
use crate::constants::counters;
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, CommandExecutor, Precondition, SystemContext};
use crate::models::{CoordinatorAction, CoordinatorJob};
use crate::state_machine::{CoordinatorActionStatus, CoordinatorJobStatus};

/// Create the actions whose nominal time falls inside the materialization window.
///
/// Materialization stops at the job's end time, its pause time, the window edge
/// (`now + materialization_window_secs`) or once `mat_throttling` actions are WAITING,
/// whichever comes first.
#[derive(Debug)]
pub struct CoordMaterializeCommand {
    job_id: String,
    job: Option<CoordinatorJob>,
    waiting: usize,
}

impl CoordMaterializeCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
            waiting: 0,
        }
    }
}

#[async_trait]
impl Command for CoordMaterializeCommand {
    fn name(&self) -> &'static str {
        "coord.materialize"
    }

    fn entity_key(&self) -> &str {
        &self.job_id
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError> {
        self.job = Some(ctx.store.get_coordinator_job(&self.job_id).await?);
        self.waiting = ctx
            .store
            .list_coordinator_actions(&self.job_id)
            .await?
            .iter()
            .filter(|action| action.status == CoordinatorActionStatus::Waiting)
            .count();
        Ok(())
    }

    fn verify_precondition(&self) -> Precondition {
        match &self.job {
            Some(job) if !job.status.is_materializable() || job.done_materialization => deferred(
                ErrorCode::E1010,
                format_args!(
                    "coordinator [{}] status [{}] done [{}]",
                    job.id, job.status, job.done_materialization
                ),
            ),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "coordinator job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();
        let window_end = now
            + ChronoDuration::try_seconds(ctx.config.coordinator.materialization_window_secs)
                .unwrap_or_else(ChronoDuration::zero);
        let limit = job
            .pause_time
            .map_or(job.end_time, |pause| pause.min(job.end_time));

        let mut next = job.next_materialized_time.unwrap_or(job.start_time);
        let mut waiting = self.waiting;
        let mut materialized = 0usize;
        let mut exhausted = false;
        while next < limit && next < window_end && waiting < job.mat_throttling {
            let action_number = job.last_action_number + 1;
            let action = CoordinatorAction::new(&job, action_number, next);
            if let Some(registration) = registration::coordinator_action(&action, &job) {
                effects.register_sla(registration);
            }
            effects.queue(CoordActionInputCheckCommand::new(&action.id));
            effects.insert(action);
            effects.count(counters::COORD_ACTIONS_MATERIALIZED);
            job.last_action_number = action_number;
            waiting += 1;
            materialized += 1;

            match job.next_nominal(next) {
                Some(following) => next = following,
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        job.next_materialized_time = Some(next);
        if exhausted || next >= job.end_time {
            job.done_materialization = true;
            effects.queue(CoordStatusTransitCommand::new(&job.id));
        }
        if job.status == CoordinatorJobStatus::Prep {
            job.status = CoordinatorJobStatus::Running;
            effects.event(JobEvent::coordinator_job(&job));
        }
        job.last_modified_time = now;

        crate::log_command!(
            info,
            "coordinator_materialized",
            command: self.name(),
            entity: self.job_id,
            materialized: materialized,
            last_action_number: job.last_action_number,
            done: job.done_materialization,
        );
        effects.update(job);
        Ok(effects)
    }
}

/// Periodically queues materialization for every coordinator that can still produce
/// actions.
#[derive(Debug)]
pub struct MaterializationTrigger {
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaterializationTrigger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub fn start(&self, executor: &Arc<CommandExecutor>) {
        let handle = tokio::spawn(Self::trigger_loop(Arc::downgrade(executor), self.interval));
        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
        info!(interval_secs = self.interval.as_secs(), "Materialization trigger started");
    }

    async fn trigger_loop(executor: Weak<CommandExecutor>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(executor) = executor.upgrade() else {
                debug!("Command executor dropped, stopping materialization trigger");
                break;
            };
            Self::run_once(&executor).await;
        }
    }

    /// Queue one materialization per eligible coordinator; returns how many were queued
    pub async fn run_once(executor: &CommandExecutor) -> usize {
        let statuses = [
            CoordinatorJobStatus::Prep,
            CoordinatorJobStatus::Running,
            CoordinatorJobStatus::RunningWithError,
        ];
        let jobs = match executor.context().store.list_coordinator_jobs(&statuses).await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(error = %err, "Could not list coordinators to materialize");
                return 0;
            }
        };
        let mut queued = 0;
        for job in jobs.iter().filter(|job| !job.done_materialization) {
            if executor.queue(CoordMaterializeCommand::new(&job.id)) {
                queued += 1;
            }
        }
        debug!(queued, "Materialization trigger tick");
        queued
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!("Materialization trigger stopped");
        }
    }
}
