//! The [`Command`] contract and the effects a command hands back to the executor.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use super::context::SystemContext;
use crate::error::CommandError;
use crate::events::JobEvent;
use crate::models::SlaRegistration;
use crate::store::{Bean, UpdateQuery, WriteBatch};

/// Priority used unless a command overrides it
pub const DEFAULT_PRIORITY: i32 = 0;

/// Result of a precondition check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Ready,
    /// Not actionable now; the executor drops the command without retrying
    Deferred(String),
}

impl Precondition {
    pub fn deferred(reason: impl Into<String>) -> Self {
        Self::Deferred(reason.into())
    }
}

/// A command to enqueue once the issuing command's batch has committed
#[derive(Debug)]
pub struct FollowUp {
    pub command: Box<dyn Command>,
    pub delay: Duration,
}

/// Everything a command wants done after `execute` returns.
///
/// The executor commits `batch` first; only when that succeeds does it bump
/// `counters`, register `sla_registrations`, queue `events` and enqueue `follow_ups`.
/// The SLA service persists each registration together with its summary.
#[derive(Debug, Default)]
pub struct CommandEffects {
    pub batch: WriteBatch,
    pub follow_ups: Vec<FollowUp>,
    pub events: Vec<JobEvent>,
    pub sla_registrations: Vec<SlaRegistration>,
    /// Registrations replacing an earlier one for the same id (re-runs)
    pub sla_updates: Vec<SlaRegistration>,
    pub counters: Vec<&'static str>,
}

impl CommandEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bean: impl Into<Bean>) {
        self.batch.insert(bean);
    }

    pub fn update(&mut self, bean: impl Into<Bean>) {
        self.batch.update(bean);
    }

    pub fn update_with(&mut self, query: UpdateQuery, bean: impl Into<Bean>) {
        self.batch.update_with(query, bean);
    }

    pub fn queue(&mut self, command: impl Command + 'static) {
        self.queue_delayed(command, Duration::ZERO);
    }

    pub fn queue_delayed(&mut self, command: impl Command + 'static, delay: Duration) {
        self.follow_ups.push(FollowUp {
            command: Box::new(command),
            delay,
        });
    }

    /// Queue an event if the status produced one
    pub fn event(&mut self, event: Option<JobEvent>) {
        self.events.extend(event);
    }

    pub fn register_sla(&mut self, registration: SlaRegistration) {
        self.sla_registrations.push(registration);
    }

    pub fn update_sla(&mut self, registration: SlaRegistration) {
        self.sla_updates.push(registration);
    }

    pub fn count(&mut self, counter: &'static str) {
        self.counters.push(counter);
    }
}

/// A queueable unit of state-mutating work.
///
/// Commands are re-derivable: `load_state` reads everything `execute` needs from the
/// store, so running a command again after a crash or a retry is safe. Two commands
/// with the same `entity_key` never run at the same time.
#[async_trait]
pub trait Command: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Job or action id serializing execution
    fn entity_key(&self) -> &str;

    /// De-duplication key for the queue
    fn key(&self) -> String {
        format!("{}_{}", self.name(), self.entity_key())
    }

    async fn load_state(&mut self, ctx: &SystemContext) -> Result<(), CommandError>;

    fn verify_precondition(&self) -> Precondition;

    async fn execute(&mut self, ctx: &SystemContext) -> Result<CommandEffects, CommandError>;
}
