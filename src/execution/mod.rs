//! # Command Execution
//!
//! The [`Command`] contract, the priority [`CommandQueue`], per-entity locking and the
//! [`CommandExecutor`] worker pool, plus the [`SystemContext`] and external
//! collaborators commands run against.

pub mod collaborators;
pub mod command;
pub mod context;
pub mod executor;
pub mod instrumentation;
pub mod locks;
pub mod outcome;
pub mod queue;

pub use collaborators::{
    ActionExecutor, ActionExecutorError, ActionExecutorRegistry, ActionStart, AlwaysAvailable,
    InputDependencyChecker, JobNotifier, JobWorkspace, LoggingNotifier, NoopActionExecutor,
    NoopWorkspace, StaticDependencyChecker,
};
pub use command::{Command, CommandEffects, FollowUp, Precondition, DEFAULT_PRIORITY};
pub use context::SystemContext;
pub use executor::{CommandExecutor, ExecutorStatsSnapshot};
pub use instrumentation::Instrumentation;
pub use locks::{EntityLockGuard, EntityLockRegistry};
pub use outcome::CommandOutcome;
pub use queue::{CommandQueue, QueueOutcome, QueuedCommand};
