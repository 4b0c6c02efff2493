//! # Engine Bootstrap
//!
//! Wires the entity store, configuration, event dispatch, SLA service, command executor
//! and materialization trigger into one [`EngineSystem`], and owns their lifecycle.
//!
//! Start order is SLA (restart recovery must finish before new events arrive), event
//! drain, executor workers, then the materialization trigger. Shutdown runs in reverse.
//!
//! ```rust,no_run
//! use jobflow_core::bootstrap::{BootstrapConfig, EngineSystem};
//!
//! # async fn example() -> jobflow_core::Result<()> {
//! let system = EngineSystem::bootstrap(BootstrapConfig::default())?;
//! system.start().await?;
//! let workflows = system.workflows();
//! # let _ = workflows;
//! system.shutdown(std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::commands::MaterializationTrigger;
use crate::config::ConfigManager;
use crate::engine::{BundleEngine, CoordinatorEngine, WorkflowEngine};
use crate::error::{JobflowError, Result};
use crate::events::{EventHandlerService, EventPublisher};
use crate::execution::{
    ActionExecutorRegistry, CommandExecutor, ExecutorStatsSnapshot, InputDependencyChecker,
    JobNotifier, JobWorkspace, SystemContext,
};
use crate::ids::IdGenerator;
use crate::sla::{SlaJobEventListener, SlaService};
use crate::store::{EntityStore, InMemoryEntityStore};

/// Where to load configuration from
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Custom configuration directory (None = `config/`)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = `JOBFLOW_ENV` or development)
    pub environment_override: Option<String>,
    /// System id embedded in generated job ids
    pub system_id: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            config_directory: None,
            environment_override: None,
            system_id: "jobflow".to_string(),
        }
    }
}

/// Collaborators and store to build an [`EngineSystem`] with; unset parts use defaults
pub struct EngineSystemBuilder {
    config_manager: Arc<ConfigManager>,
    system_id: String,
    store: Option<Arc<dyn EntityStore>>,
    action_executors: Option<Arc<ActionExecutorRegistry>>,
    notifier: Option<Arc<dyn JobNotifier>>,
    workspace: Option<Arc<dyn JobWorkspace>>,
    dependency_checker: Option<Arc<dyn InputDependencyChecker>>,
}

impl EngineSystemBuilder {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self {
            config_manager,
            system_id: BootstrapConfig::default().system_id,
            store: None,
            action_executors: None,
            notifier: None,
            workspace: None,
            dependency_checker: None,
        }
    }

    pub fn system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = system_id.into();
        self
    }

    pub fn store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn action_executors(mut self, registry: Arc<ActionExecutorRegistry>) -> Self {
        self.action_executors = Some(registry);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn JobNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn workspace(mut self, workspace: Arc<dyn JobWorkspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn dependency_checker(mut self, checker: Arc<dyn InputDependencyChecker>) -> Self {
        self.dependency_checker = Some(checker);
        self
    }

    pub fn build(self) -> EngineSystem {
        let config = self.config_manager.config().clone();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryEntityStore::new()));

        let events = Arc::new(EventHandlerService::new(config.events.enabled));
        let publisher = EventPublisher::new(config.events.sla_channel_capacity);
        let sla = config.sla.enabled.then(|| {
            let sla = Arc::new(SlaService::new(
                Arc::clone(&store),
                publisher.clone(),
                config.sla.clone(),
            ));
            events.add_listener(Arc::new(SlaJobEventListener::new(Arc::clone(&sla))));
            sla
        });

        let trigger = MaterializationTrigger::new(config.coordinator.materialization_interval());
        let mut ctx = SystemContext::new(Arc::clone(&store), config)
            .with_ids(IdGenerator::new(self.system_id))
            .with_events(Arc::clone(&events));
        if let Some(sla) = &sla {
            ctx = ctx.with_sla(Arc::clone(sla));
        }
        if let Some(registry) = self.action_executors {
            ctx = ctx.with_action_executors(registry);
        }
        if let Some(notifier) = self.notifier {
            ctx = ctx.with_notifier(notifier);
        }
        if let Some(workspace) = self.workspace {
            ctx = ctx.with_workspace(workspace);
        }
        if let Some(checker) = self.dependency_checker {
            ctx = ctx.with_dependency_checker(checker);
        }

        let executor = Arc::new(CommandExecutor::new(ctx));
        EngineSystem {
            config_manager: self.config_manager,
            store,
            workflows: WorkflowEngine::new(Arc::clone(&executor)),
            coordinators: CoordinatorEngine::new(Arc::clone(&executor)),
            bundles: BundleEngine::new(Arc::clone(&executor)),
            executor,
            events,
            publisher,
            sla,
            trigger,
            running: AtomicBool::new(false),
        }
    }
}

/// Running engine: executor, engines and background services
pub struct EngineSystem {
    config_manager: Arc<ConfigManager>,
    store: Arc<dyn EntityStore>,
    executor: Arc<CommandExecutor>,
    events: Arc<EventHandlerService>,
    publisher: EventPublisher,
    sla: Option<Arc<SlaService>>,
    trigger: MaterializationTrigger,
    workflows: WorkflowEngine,
    coordinators: CoordinatorEngine,
    bundles: BundleEngine,
    running: AtomicBool,
}

impl std::fmt::Debug for EngineSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSystem")
            .field("environment", &self.config_manager.environment())
            .field("executor", &self.executor)
            .field("sla", &self.sla)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Point-in-time view of a system
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub sla_enabled: bool,
    pub sla_entries: usize,
    pub executor: ExecutorStatsSnapshot,
    pub events_queued: u64,
    pub events_dispatched: u64,
}

impl EngineSystem {
    /// Load configuration and build a system over the in-memory store
    pub fn bootstrap(bootstrap: BootstrapConfig) -> Result<Self> {
        let environment = bootstrap
            .environment_override
            .unwrap_or_else(ConfigManager::detect_environment);
        let config_manager =
            ConfigManager::load_from_directory_with_env(bootstrap.config_directory, &environment)?;
        Ok(EngineSystemBuilder::new(config_manager)
            .system_id(bootstrap.system_id)
            .build())
    }

    pub fn builder(config_manager: Arc<ConfigManager>) -> EngineSystemBuilder {
        EngineSystemBuilder::new(config_manager)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(JobflowError::InvalidState("Engine system already running".to_string()));
        }
        info!(environment = %self.config_manager.environment(), "Starting engine system");

        if let Some(sla) = &self.sla {
            sla.start().await;
        }
        self.events.start();
        if let Err(err) = self.executor.start() {
            self.running.store(false, Ordering::Release);
            return Err(err);
        }
        self.trigger.start(&self.executor);

        info!("Engine system started");
        Ok(())
    }

    /// Stop background work, giving in-flight commands up to `timeout`
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Engine system already stopped");
            return Ok(());
        }
        info!("Stopping engine system");

        self.trigger.shutdown();
        let executor = self.executor.shutdown(timeout).await;
        self.events.shutdown();
        if let Some(sla) = &self.sla {
            sla.shutdown();
        }
        executor?;

        info!("Engine system stopped");
        Ok(())
    }

    pub fn status(&self) -> SystemStatus {
        let dispatch = self.events.stats();
        SystemStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            sla_enabled: self.sla.is_some(),
            sla_entries: self.sla.as_ref().map_or(0, |sla| sla.calculator().size()),
            executor: self.executor.stats(),
            events_queued: dispatch.queued.load(Ordering::Relaxed),
            events_dispatched: dispatch.dispatched.load(Ordering::Relaxed),
        }
    }

    pub fn workflows(&self) -> &WorkflowEngine {
        &self.workflows
    }

    pub fn coordinators(&self) -> &CoordinatorEngine {
        &self.coordinators
    }

    pub fn bundles(&self) -> &BundleEngine {
        &self.bundles
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn sla(&self) -> Option<&Arc<SlaService>> {
        self.sla.as_ref()
    }

    /// Broadcast channel of SLA milestone events
    pub fn sla_events(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}
