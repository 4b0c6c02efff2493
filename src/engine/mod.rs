//! # Engines
//!
//! Facades that turn external job requests into commands. Submissions run through
//! [`CommandExecutor::call`] so the new id is persisted before it is returned; state
//! transitions run the same way so a request that does not apply to the job's current
//! status is reported to the caller instead of being silently dropped. Everything the
//! transition cascades to (child jobs, actions, notifications) is queued.

pub mod bundle;
pub mod coordinator;
pub mod workflow;

pub use bundle::{BundleEngine, BundleRequest};
pub use coordinator::CoordinatorEngine;
pub use workflow::WorkflowEngine;

use crate::error::{JobflowError, Result};
use crate::execution::{Command, CommandExecutor, CommandOutcome};

/// Run `command` synchronously and fold its outcome into a crate result
pub(crate) async fn call(executor: &CommandExecutor, command: impl Command) -> Result<()> {
    match executor.call(command).await {
        CommandOutcome::Completed => Ok(()),
        CommandOutcome::Deferred(reason) => Err(JobflowError::InvalidState(reason)),
        CommandOutcome::Failed(err) => Err(JobflowError::Command(err)),
    }
}

pub(crate) fn require_user(user: &str) -> Result<()> {
    if user.trim().is_empty() {
        return Err(JobflowError::InvalidInput("user must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::execution::{CommandExecutor, SystemContext};
    use crate::ids::IdGenerator;
    use crate::store::InMemoryEntityStore;

    /// Executor that is not started; tests drive queued commands by hand or inspect the queue
    pub fn executor() -> (Arc<CommandExecutor>, Arc<InMemoryEntityStore>) {
        let store = Arc::new(InMemoryEntityStore::new());
        let ctx = SystemContext::new(store.clone(), EngineConfig::default())
            .with_ids(IdGenerator::new("test"));
        (Arc::new(CommandExecutor::new(ctx)), store)
    }
}
