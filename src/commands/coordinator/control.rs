//! User-initiated coordinator transitions and in-flight changes. Suspend, resume and
//! kill cascade to the child workflows of the affected actions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;

use super::{CoordActionReadyCommand, CoordMaterializeCommand, CoordStatusTransitCommand};
use crate::commands::bundle::BundleStatusUpdateCommand;
use crate::commands::workflow::{KillCommand, ResumeCommand, SuspendCommand};
use crate::commands::{deferred, loaded};
use crate::error::{CommandError, ErrorCode};
use crate::events::JobEvent;
use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
use crate::models::{CoordinatorAction, CoordinatorJob};
use crate::state_machine::{guards, CoordinatorActionStatus, CoordinatorJobStatus};

/// Event plus bundle roll-up for a coordinator status change
fn job_transition_effects(job: &CoordinatorJob, effects: &mut CommandEffects) {
    effects.event(JobEvent::coordinator_job(job));
    if let Some(bundle_id) = &job.bundle_id {
        effects.queue(BundleStatusUpdateCommand::new(bundle_id));
    }
}

fn invalid_status(job: &CoordinatorJob) -> Precondition {
    deferred(
        ErrorCode::E1010,
        format_args!("coordinator [{}] status [{}]", job.id, job.status),
    )
}

/// Child workflow ids of the actions in one of `statuses`
fn children<'a>(
    actions: &'a [CoordinatorAction],
    statuses: &'a [CoordinatorActionStatus],
) -> impl Iterator<Item = &'a str> + 'a {
    actions
        .iter()
        .filter(|action| statuses.contains(&action.status))
        .filter_map(|action| action.external_id.as_deref())
}

#[derive(Debug)]
pub struct CoordSuspendCommand {
    job_id: String,
    job: Option<CoordinatorJob>,
    actions: Vec<CoordinatorAction>,
}

impl CoordSuspendCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
            actions: Vec::new(),
        }
    }
}

#[async_trait]
impl Command for CoordSuspendCommand {
    fn name(&self) -> &'static str {
        "coord.suspend"
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
            Some(job) if job.status.is_terminal() || job.status.is_suspended() => invalid_status(job),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "coordinator job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        let status = if job.status == CoordinatorJobStatus::Prep {
            CoordinatorJobStatus::PrepSuspended
        } else {
            CoordinatorJobStatus::Suspended
        };
        guards::coordinator_transition(&job.id, job.status, status)?;
        job.status = status;
        job.suspended_time = Some(now);
        job.last_modified_time = now;

        let mut cascaded = 0;
        for workflow_id in children(&self.actions, &[CoordinatorActionStatus::Running]) {
            effects.queue(SuspendCommand::new(workflow_id));
            cascaded += 1;
        }
        job_transition_effects(&job, &mut effects);

        crate::log_command!(
            info,
            "coordinator_suspended",
            command: self.name(),
            entity: self.job_id,
            status: job.status,
            workflows: cascaded,
        );
        effects.update(job);
        Ok(effects)
    }
}

#[derive(Debug)]
pub struct CoordResumeCommand {
    job_id: String,
    job: Option<CoordinatorJob>,
    actions: Vec<CoordinatorAction>,
}

impl CoordResumeCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
            actions: Vec::new(),
        }
    }
}

#[async_trait]
impl Command for CoordResumeCommand {
    fn name(&self) -> &'static str {
        "coord.resume"
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
            Some(job) if !job.status.is_suspended() => invalid_status(job),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "coordinator job")?;
        let mut effects = CommandEffects::new();

        job.status = if job.status == CoordinatorJobStatus::PrepSuspended {
            CoordinatorJobStatus::Prep
        } else if self.actions.iter().any(|action| action.status.is_error()) {
            CoordinatorJobStatus::RunningWithError
        } else {
            CoordinatorJobStatus::Running
        };
        job.suspended_time = None;
        job.last_modified_time = Utc::now();

        for workflow_id in children(&self.actions, &[CoordinatorActionStatus::Suspended]) {
            effects.queue(ResumeCommand::new(workflow_id));
        }
        effects.queue(CoordMaterializeCommand::new(&job.id));
        effects.queue(CoordActionReadyCommand::new(&job.id));
        job_transition_effects(&job, &mut effects);

        crate::log_command!(info, "coordinator_resumed", command: self.name(), entity: self.job_id, status: job.status,);
        effects.update(job);
        Ok(effects)
    }
}

#[derive(Debug)]
pub struct CoordKillCommand {
    job_id: String,
    job: Option<CoordinatorJob>,
    actions: Vec<CoordinatorAction>,
}

impl CoordKillCommand {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
            actions: Vec::new(),
        }
    }
}

#[async_trait]
impl Command for CoordKillCommand {
    fn name(&self) -> &'static str {
        "coord.kill"
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
            Some(job) if job.status.is_terminal() => invalid_status(job),
            _ => Precondition::Ready,
        }
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "coordinator job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();

        guards::coordinator_transition(&job.id, job.status, CoordinatorJobStatus::Killed)?;
        job.status = CoordinatorJobStatus::Killed;
        job.done_materialization = true;
        job.last_modified_time = now;

        let mut killed = 0;
        for mut action in std::mem::take(&mut self.actions) {
            if action.status.is_terminal() {
                continue;
            }
            if let Some(workflow_id) = action.external_id.as_deref() {
                effects.queue(KillCommand::new(workflow_id));
            }
            action.status = CoordinatorActionStatus::Killed;
            action.last_modified_time = now;
            effects.event(JobEvent::coordinator_action(&action, &job, None, Some(now)));
            effects.update(action);
            killed += 1;
        }
        job_transition_effects(&job, &mut effects);

        crate::log_command!(info, "coordinator_killed", command: self.name(), entity: self.job_id, actions: killed,);
        effects.update(job);
        Ok(effects)
    }
}

/// Requested coordinator changes; fields left `None` are untouched.
///
/// Parsed from `concurrency=N;endtime=T;pausetime=T` with RFC3339 times. An empty
/// `pausetime=` clears the pause time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordChange {
    pub concurrency: Option<i32>,
    pub end_time: Option<DateTime<Utc>>,
    pub pause_time: Option<Option<DateTime<Utc>>>,
}

fn change_error(message: impl Into<String>) -> CommandError {
    CommandError::new(ErrorCode::E1012, message)
}

fn parse_time(key: &str, value: &str) -> Result<DateTime<Utc>, CommandError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| change_error(format!("invalid {key} [{value}]: {err}")))
}

impl FromStr for CoordChange {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut change = Self::default();
        for entry in s.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| change_error(format!("expected key=value, got [{entry}]")))?;
            let (key, value) = (key.trim().to_ascii_lowercase(), value.trim());
            match key.as_str() {
                "concurrency" => {
                    let concurrency = value
                        .parse()
                        .map_err(|_| change_error(format!("invalid concurrency [{value}]")))?;
                    change.concurrency = Some(concurrency);
                }
                "endtime" => change.end_time = Some(parse_time(&key, value)?),
                "pausetime" if value.is_empty() => change.pause_time = Some(None),
                "pausetime" => change.pause_time = Some(Some(parse_time(&key, value)?)),
                other => return Err(change_error(format!("unknown change [{other}]"))),
            }
        }
        if change == Self::default() {
            return Err(change_error("no change requested"));
        }
        Ok(change)
    }
}

#[derive(Debug)]
pub struct CoordChangeCommand {
    job_id: String,
    change: CoordChange,
    job: Option<CoordinatorJob>,
    actions: Vec<CoordinatorAction>,
}

impl CoordChangeCommand {
    pub fn new(job_id: impl Into<String>, change: CoordChange) -> Self {
        Self {
            job_id: job_id.into(),
            change,
            job: None,
            actions: Vec::new(),
        }
    }

    fn validate(&self, job: &CoordinatorJob, now: DateTime<Utc>) -> Result<(), CommandError> {
        if job.status.is_terminal() {
            return Err(change_error(format!(
                "coordinator [{}] is already [{}]",
                job.id, job.status
            )));
        }
        if let Some(end_time) = self.change.end_time {
            if end_time < job.start_time {
                return Err(change_error(format!(
                    "end time [{end_time}] before start time [{}]",
                    job.start_time
                )));
            }
            let last_nominal = self.actions.iter().map(|action| action.nominal_time).max();
            if let Some(last) = last_nominal.filter(|last| end_time <= *last) {
                return Err(change_error(format!(
                    "end time [{end_time}] not after last materialized action [{last}]"
                )));
            }
        }
        if let Some(Some(pause_time)) = self.change.pause_time {
            if pause_time < now {
                return Err(change_error(format!("pause time [{pause_time}] is in the past")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Command for CoordChangeCommand {
    fn name(&self) -> &'static str {
        "coord.change"
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
        Precondition::Ready
    }

    async fn execute(&mut self, _ctx: &SystemContext) -> Result<CommandEffects, CommandError> {
        let mut job = loaded(&mut self.job, "coordinator job")?;
        let mut effects = CommandEffects::new();
        let now = Utc::now();
        self.validate(&job, now)?;

        if let Some(concurrency) = self.change.concurrency {
            job.concurrency = concurrency;
        }
        if let Some(end_time) = self.change.end_time {
            job.end_time = end_time;
        }
        if let Some(pause_time) = self.change.pause_time {
            job.pause_time = pause_time;
        }
        job.done_materialization = job
            .next_materialized_time
            .is_some_and(|next| next >= job.end_time);
        job.last_modified_time = now;

        if job.done_materialization {
            effects.queue(CoordStatusTransitCommand::new(&job.id));
        } else {
            effects.queue(CoordMaterializeCommand::new(&job.id));
        }
        effects.queue(CoordActionReadyCommand::new(&job.id));

        crate::log_command!(
            info,
            "coordinator_changed",
            command: self.name(),
            entity: self.job_id,
            change: self.change,
            done: job.done_materialization,
        );
        effects.update(job);
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::coordinator::test_support::{hourly, seed_actions, seed_job, start, update_job};
    use crate::commands::test_support::{context, follow_up_keys, follow_up_names, run};
    use crate::store::{EntityStore, InMemoryEntityStore};
    use crate::state_machine::CoordinatorActionStatus::*;
    use chrono::Duration;

    async fn running(store: &InMemoryEntityStore, actions: &[CoordinatorActionStatus]) -> CoordinatorJob {
        let mut job = seed_job(store, hourly(10)).await;
        job.status = CoordinatorJobStatus::Running;
        job.bundle_id = Some("b-B".to_string());
        update_job(store, job.clone()).await;
        seed_actions(store, &job, actions).await;
        let mut batch = crate::store::WriteBatch::new();
        for (index, mut action) in store.list_coordinator_actions(&job.id).await.unwrap().into_iter().enumerate() {
            if action.status.occupies_slot() {
                action.external_id = Some(format!("wf-{index}"));
                batch.update(action);
            }
        }
        store.execute_batch(batch).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_suspend_cascades_to_running_workflows() {
        let (ctx, store) = context();
        running(&store, &[Running, Waiting, Running]).await;

        let effects = run(&ctx, &mut CoordSuspendCommand::new("c-C")).await.unwrap();
        let job = store.get_coordinator_job("c-C").await.unwrap();
        assert_eq!(job.status, CoordinatorJobStatus::Suspended);
        assert!(job.suspended_time.is_some());
        assert_eq!(
            follow_up_keys(&effects),
            vec![
                "suspend_wf-0".to_string(),
                "suspend_wf-2".to_string(),
                "bundle.status.update_b-B".to_string(),
            ]
        );

        let reason = run(&ctx, &mut CoordSuspendCommand::new("c-C")).await.unwrap_err();
        assert!(reason.starts_with("E1010"), "{reason}");
    }

    #[tokio::test]
    async fn test_prep_suspend_and_resume_round_trip() {
        let (ctx, store) = context();
        seed_job(&store, hourly(2)).await;

        run(&ctx, &mut CoordSuspendCommand::new("c-C")).await.unwrap();
        assert_eq!(
            store.get_coordinator_job("c-C").await.unwrap().status,
            CoordinatorJobStatus::PrepSuspended
        );
        let effects = run(&ctx, &mut CoordResumeCommand::new("c-C")).await.unwrap();
        let job = store.get_coordinator_job("c-C").await.unwrap();
        assert_eq!(job.status, CoordinatorJobStatus::Prep);
        assert!(job.suspended_time.is_none());
        let names = follow_up_names(&effects);
        assert!(names.contains(&"coord.materialize"));
        assert!(names.contains(&"coord.action.ready"));
    }

    #[tokio::test]
    async fn test_resume_keeps_error_state_and_resumes_children() {
        let (ctx, store) = context();
        let mut job = running(&store, &[Failed, Suspended]).await;
        job.status = CoordinatorJobStatus::Suspended;
        update_job(&store, job).await;

        let effects = run(&ctx, &mut CoordResumeCommand::new("c-C")).await.unwrap();
        assert_eq!(
            store.get_coordinator_job("c-C").await.unwrap().status,
            CoordinatorJobStatus::RunningWithError
        );
        assert!(follow_up_keys(&effects).contains(&"resume_wf-1".to_string()));
    }

    #[tokio::test]
    async fn test_kill_marks_open_actions_and_kills_children() {
        let (ctx, store) = context();
        running(&store, &[Succeeded, Running, Waiting]).await;

        let effects = run(&ctx, &mut CoordKillCommand::new("c-C")).await.unwrap();
        let job = store.get_coordinator_job("c-C").await.unwrap();
        assert_eq!(job.status, CoordinatorJobStatus::Killed);
        assert!(job.done_materialization);
        let statuses: Vec<_> = store
            .list_coordinator_actions("c-C")
            .await
            .unwrap()
            .into_iter()
            .map(|action| action.status)
            .collect();
        assert_eq!(statuses, vec![Succeeded, Killed, Killed]);
        assert!(follow_up_keys(&effects).contains(&"kill_wf-1".to_string()));
        // two action events plus the job event
        assert_eq!(effects.events.len(), 3);
    }

    #[test]
    fn test_change_parsing() {
        let change: CoordChange = "concurrency=5;endtime=2026-03-01T00:00:00Z;pausetime="
            .parse()
            .unwrap();
        assert_eq!(change.concurrency, Some(5));
        assert_eq!(change.end_time, Some(start() + Duration::days(59)));
        assert_eq!(change.pause_time, Some(None));

        assert_eq!("".parse::<CoordChange>().unwrap_err().code, ErrorCode::E1012);
        assert!("priority=3".parse::<CoordChange>().is_err());
        assert!("endtime=tomorrow".parse::<CoordChange>().is_err());
    }

    #[tokio::test]
    async fn test_change_extends_finished_materialization() {
        let (ctx, store) = context();
        let mut job = running(&store, &[Succeeded, Succeeded]).await;
        job.end_time = start() + Duration::hours(2);
        job.next_materialized_time = Some(start() + Duration::hours(2));
        job.done_materialization = true;
        update_job(&store, job).await;

        let change = CoordChange {
            concurrency: Some(3),
            end_time: Some(start() + Duration::hours(6)),
            pause_time: None,
        };
        let effects = run(&ctx, &mut CoordChangeCommand::new("c-C", change)).await.unwrap();
        let job = store.get_coordinator_job("c-C").await.unwrap();
        assert_eq!(job.concurrency, 3);
        assert!(!job.done_materialization);
        assert!(follow_up_names(&effects).contains(&"coord.materialize"));
    }

    #[tokio::test]
    async fn test_change_rejects_invalid_times() {
        let (ctx, store) = context();
        running(&store, &[Succeeded, Succeeded, Waiting]).await;

        let before_actions = CoordChange {
            end_time: Some(start() + Duration::hours(1)),
            ..CoordChange::default()
        };
        let err = run(&ctx, &mut CoordChangeCommand::new("c-C", before_actions)).await.unwrap_err();
        assert!(err.starts_with("E1012"), "{err}");

        let past_pause = CoordChange {
            pause_time: Some(Some(Utc::now() - Duration::hours(1))),
            ..CoordChange::default()
        };
        let err = run(&ctx, &mut CoordChangeCommand::new("c-C", past_pause)).await.unwrap_err();
        assert!(err.starts_with("E1012"), "{err}");
    }
}
