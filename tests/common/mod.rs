//! Shared builders for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use jobflow_core::bootstrap::EngineSystem;
use jobflow_core::config::{ConfigManager, EngineConfig};
use jobflow_core::execution::{
    ActionExecutor, ActionExecutorError, ActionExecutorRegistry, ActionStart, NoopActionExecutor,
};
use jobflow_core::instance::WorkflowApp;
use jobflow_core::models::{CoordinatorDefinition, TimeUnit, WorkflowAction, WorkflowJob};

pub const WAIT: Duration = Duration::from_secs(10);

/// Config tuned for tests: short idle polls, no background materialization
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.executor.workers = 4;
    config.executor.idle_poll_ms = 5;
    config.executor.lock_retry_delay_ms = 2;
    config.executor.retry_initial_delay_ms = 10;
    config.coordinator.materialization_interval_secs = 3600;
    config.coordinator.input_check_interval_ms = 20;
    config
}

/// Executor for `script` actions: named nodes fail or run externally, others succeed
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failing: HashSet<String>,
    external: HashSet<String>,
}

impl ScriptedExecutor {
    pub const ACTION_TYPE: &'static str = "script";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, node: &str) -> Self {
        self.failing.insert(node.to_string());
        self
    }

    pub fn external(mut self, node: &str) -> Self {
        self.external.insert(node.to_string());
        self
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    fn action_type(&self) -> &str {
        Self::ACTION_TYPE
    }

    async fn start(
        &self,
        action: &WorkflowAction,
        _job: &WorkflowJob,
    ) -> Result<ActionStart, ActionExecutorError> {
        if self.failing.contains(&action.name) {
            return Err(ActionExecutorError::Error {
                code: "SCRIPT_FAILED".to_string(),
                message: format!("{} exited with 1", action.name),
            });
        }
        if self.external.contains(&action.name) {
            return Ok(ActionStart::Running {
                external_id: format!("ext-{}", action.name),
                external_status: Some("RUNNING".to_string()),
            });
        }
        Ok(ActionStart::ok())
    }

    async fn kill(&self, _action: &WorkflowAction, _job: &WorkflowJob) -> Result<(), ActionExecutorError> {
        Ok(())
    }
}

pub async fn started_system(config: EngineConfig, scripted: ScriptedExecutor) -> EngineSystem {
    let registry = ActionExecutorRegistry::new();
    registry.register(Arc::new(NoopActionExecutor::new()));
    registry.register(Arc::new(scripted));

    let system = EngineSystem::builder(ConfigManager::from_config(config).unwrap())
        .system_id("it")
        .action_executors(Arc::new(registry))
        .build();
    system.start().await.unwrap();
    system
}

/// Poll `check` until it holds or `WAIT` elapses
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// `first -> second -> end`, any error goes to `fail`
pub fn script_app(name: &str) -> WorkflowApp {
    WorkflowApp::builder(name)
        .action("first", ScriptedExecutor::ACTION_TYPE, "second", "fail")
        .action("second", ScriptedExecutor::ACTION_TYPE, "end", "fail")
        .end("end")
        .kill("fail", "${wf:lastErrorNode()} failed: ${wf:errorMessage(wf:lastErrorNode())}")
        .build()
        .unwrap()
}

/// Hourly coordinator whose `hours` actions all have nominal times in the past
pub fn past_hourly(name: &str, hours: i64) -> CoordinatorDefinition {
    let now: DateTime<Utc> = Utc::now()
        .duration_trunc(ChronoDuration::hours(1))
        .unwrap_or_else(|_| Utc::now());
    let mut definition = CoordinatorDefinition::new(
        name,
        script_app(&format!("{name}-wf")),
        1,
        TimeUnit::Hour,
        now - ChronoDuration::hours(hours),
        now,
    );
    definition.concurrency = 2;
    definition
}
