//! # System Context
//!
//! Shared services handed to every command: the entity store, configuration, id
//! generation, instrumentation, external collaborators, event dispatch and the SLA
//! service.

use std::sync::Arc;

use super::collaborators::{
    ActionExecutorRegistry, AlwaysAvailable, InputDependencyChecker, JobNotifier, JobWorkspace,
    LoggingNotifier, NoopWorkspace,
};
use super::instrumentation::Instrumentation;
use crate::config::EngineConfig;
use crate::error::{CommandError, ErrorCode};
use crate::events::EventHandlerService;
use crate::ids::IdGenerator;
use crate::sla::SlaService;
use crate::store::EntityStore;

#[derive(Debug, Clone)]
pub struct SystemContext {
    pub store: Arc<dyn EntityStore>,
    pub config: Arc<EngineConfig>,
    pub ids: Arc<IdGenerator>,
    pub instrumentation: Arc<Instrumentation>,
    pub action_executors: Arc<ActionExecutorRegistry>,
    pub notifier: Arc<dyn JobNotifier>,
    pub workspace: Arc<dyn JobWorkspace>,
    pub dependency_checker: Arc<dyn InputDependencyChecker>,
    pub events: Arc<EventHandlerService>,
    pub sla: Option<Arc<SlaService>>,
}

impl SystemContext {
    /// Context with default collaborators and no SLA service
    pub fn new(store: Arc<dyn EntityStore>, config: EngineConfig) -> Self {
        let events_enabled = config.events.enabled;
        Self {
            store,
            config: Arc::new(config),
            ids: Arc::new(IdGenerator::default()),
            instrumentation: Arc::new(Instrumentation::new()),
            action_executors: Arc::new(ActionExecutorRegistry::with_defaults()),
            notifier: Arc::new(LoggingNotifier),
            workspace: Arc::new(NoopWorkspace),
            dependency_checker: Arc::new(AlwaysAvailable),
            events: Arc::new(EventHandlerService::new(events_enabled)),
            sla: None,
        }
    }

    pub fn with_ids(mut self, ids: IdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn with_action_executors(mut self, registry: Arc<ActionExecutorRegistry>) -> Self {
        self.action_executors = registry;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn JobNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn JobWorkspace>) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn with_dependency_checker(mut self, checker: Arc<dyn InputDependencyChecker>) -> Self {
        self.dependency_checker = checker;
        self
    }

    pub fn with_events(mut self, events: Arc<EventHandlerService>) -> Self {
        self.events = events;
        self
    }

    pub fn with_sla(mut self, sla: Arc<SlaService>) -> Self {
        self.sla = Some(sla);
        self
    }

    /// SLA service, or E0610 when SLA tracking is disabled
    pub fn require_sla(&self) -> Result<&Arc<SlaService>, CommandError> {
        self.sla
            .as_ref()
            .ok_or_else(|| CommandError::new(ErrorCode::E0610, "SLA service not available"))
    }
}
