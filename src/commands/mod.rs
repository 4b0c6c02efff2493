//! # Commands
//!
//! Concrete [`Command`](crate::execution::Command) implementations for workflows,
//! coordinators and bundles. Every command reloads what it needs in `load_state`,
//! decides in `verify_precondition` whether it is actionable, and returns its writes,
//! events and follow-up commands as [`CommandEffects`](crate::execution::CommandEffects).

pub mod bundle;
pub mod coordinator;
pub mod registration;
pub mod workflow;

pub use bundle::{
    BundleKillCommand, BundleResumeCommand, BundleStartCommand, BundleStatusUpdateCommand,
    BundleSubmitCommand, BundleSuspendCommand,
};
pub use coordinator::{
    CoordActionInputCheckCommand, CoordActionReadyCommand, CoordActionStartCommand,
    CoordActionUpdateCommand, CoordChange, CoordChangeCommand, CoordKillCommand,
    CoordMaterializeCommand, CoordResumeCommand, CoordStatusTransitCommand, CoordSubmitCommand,
    CoordSuspendCommand, MaterializationTrigger,
};
pub use workflow::{
    ActionEndCommand, ActionKillCommand, ActionStartCommand, KillCommand, Notification,
    NotificationCommand, ReRunCommand, ResumeCommand, SignalCommand, SubmitCommand,
    SuspendCommand, WorkflowEndCommand,
};

use crate::error::{CommandError, ErrorCode};

/// Deferral reason carrying the error code that explains it
pub(crate) fn deferred(code: ErrorCode, message: impl std::fmt::Display) -> crate::execution::Precondition {
    crate::execution::Precondition::deferred(format!("{code}: {message}"))
}

/// Take the state loaded by `load_state`, or fail with E0607
pub(crate) fn loaded<T>(slot: &mut Option<T>, what: &str) -> Result<T, CommandError> {
    slot.take().ok_or_else(|| CommandError::not_loaded(what))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::execution::{Command, CommandEffects, Precondition, SystemContext};
    use crate::instance::WorkflowApp;
    use crate::models::{JobConf, WorkflowJob};
    use crate::store::{EntityStore, InMemoryEntityStore, WriteBatch};

    pub fn context() -> (SystemContext, Arc<InMemoryEntityStore>) {
        let store = Arc::new(InMemoryEntityStore::new());
        let ctx = SystemContext::new(store.clone(), EngineConfig::default());
        (ctx, store)
    }

    /// `extract -> load -> end`, errors go to `fail`
    pub fn two_step_app() -> WorkflowApp {
        WorkflowApp::builder("etl")
            .action("extract", "noop", "load", "fail")
            .action("load", "noop", "end", "fail")
            .end("end")
            .kill("fail", "failed at ${wf:lastErrorNode()}")
            .build()
            .unwrap()
    }

    pub async fn seed(store: &InMemoryEntityStore, bean: impl Into<crate::store::Bean>) {
        let mut batch = WriteBatch::new();
        batch.insert(bean);
        store.execute_batch(batch).await.unwrap();
    }

    pub async fn seed_workflow(store: &InMemoryEntityStore, id: &str, app: WorkflowApp) -> WorkflowJob {
        let job = WorkflowJob::new(id, app, JobConf::new(), "alice");
        seed(store, job.clone()).await;
        job
    }

    /// Run one command the way the executor would, committing its batch
    pub async fn run<C: Command>(ctx: &SystemContext, command: &mut C) -> Result<CommandEffects, String> {
        command.load_state(ctx).await.map_err(|err| err.to_string())?;
        if let Precondition::Deferred(reason) = command.verify_precondition() {
            return Err(reason);
        }
        let mut effects = command.execute(ctx).await.map_err(|err| err.to_string())?;
        let batch = std::mem::take(&mut effects.batch);
        ctx.store.execute_batch(batch).await.map_err(|err| err.to_string())?;
        Ok(effects)
    }

    pub fn follow_up_names(effects: &CommandEffects) -> Vec<&'static str> {
        effects
            .follow_ups
            .iter()
            .map(|follow_up| follow_up.command.name())
            .collect()
    }

    pub fn follow_up_keys(effects: &CommandEffects) -> Vec<String> {
        effects
            .follow_ups
            .iter()
            .map(|follow_up| follow_up.command.key())
            .collect()
    }
}
