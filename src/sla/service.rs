//! # SLA Service
//!
//! Lifecycle wrapper around the [`SlaCalculator`]: restart recovery on start, the
//! periodic sweep task, and the entry points commands and the job event listener use.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::calculator::SlaCalculator;
use crate::config::SlaConfig;
use crate::events::{EventPublisher, EventStatus};
use crate::models::SlaRegistration;
use crate::store::EntityStore;

pub struct SlaService {
    calculator: Arc<SlaCalculator>,
    config: SlaConfig,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SlaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaService")
            .field("calculator", &self.calculator)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SlaService {
    pub fn new(store: Arc<dyn EntityStore>, publisher: EventPublisher, config: SlaConfig) -> Self {
        Self {
            calculator: Arc::new(SlaCalculator::new(store, publisher, &config)),
            config,
            sweep: Mutex::new(None),
        }
    }

    pub fn calculator(&self) -> &Arc<SlaCalculator> {
        &self.calculator
    }

    pub fn publisher(&self) -> &EventPublisher {
        self.calculator.publisher()
    }

    pub fn is_running(&self) -> bool {
        self.sweep.lock().is_some()
    }

    /// Reload persisted state, then sweep every `sweep_interval`. Returns the number of
    /// entries reloaded.
    pub async fn start(self: &Arc<Self>) -> usize {
        let loaded = self.calculator.load_on_restart().await;

        let weak = Arc::downgrade(self);
        let interval = self.config.sweep_interval();
        let handle = tokio::spawn(Self::sweep_loop(weak, interval));
        if let Some(previous) = self.sweep.lock().replace(handle) {
            previous.abort();
        }
        info!(
            loaded,
            capacity = self.config.capacity,
            sweep_interval_secs = self.config.sweep_interval_secs,
            "SLA service started"
        );
        loaded
    }

    async fn sweep_loop(service: Weak<Self>, period: std::time::Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(service) = service.upgrade() else {
                debug!("SLA service dropped, stopping sweep");
                break;
            };
            let changed = service.calculator.update_all_sla_status().await;
            if changed > 0 {
                debug!(changed, size = service.calculator.size(), "SLA sweep complete");
            }
        }
    }

    /// Stop the sweep and drop all in-memory state
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweep.lock().take() {
            handle.abort();
        }
        self.calculator.clear();
        info!("SLA service stopped");
    }

    pub async fn add_registration_event(&self, registration: SlaRegistration) -> bool {
        let id = registration.id.clone();
        match self.calculator.add_registration(registration).await {
            Ok(added) => added,
            Err(err) => {
                error!(sla_id = %id, error = %err, "Could not add SLA registration");
                false
            }
        }
    }

    pub async fn update_registration_event(&self, registration: SlaRegistration) -> bool {
        let id = registration.id.clone();
        match self.calculator.update_registration(registration).await {
            Ok(updated) => updated,
            Err(err) => {
                error!(sla_id = %id, error = %err, "Could not update SLA registration");
                false
            }
        }
    }

    pub async fn add_status_event(
        &self,
        id: &str,
        status: &str,
        event_status: EventStatus,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> bool {
        match self
            .calculator
            .add_job_status(id, status, event_status, start, end)
            .await
        {
            Ok(tracked) => tracked,
            Err(err) => {
                error!(sla_id = id, error = %err, "Could not apply SLA status event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppType, SlaEventStatus};
    use crate::store::InMemoryEntityStore;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn service(sweep_interval_secs: u64) -> Arc<SlaService> {
        let config = SlaConfig {
            sweep_interval_secs,
            job_event_latency_ms: 0,
            ..SlaConfig::default()
        };
        Arc::new(SlaService::new(
            Arc::new(InMemoryEntityStore::new()),
            EventPublisher::new(16),
            config,
        ))
    }

    #[tokio::test]
    async fn test_sweep_task_escalates_overdue_start() {
        let service = service(1);
        let mut events = service.publisher().subscribe();
        let mut reg = SlaRegistration::new("wf-1", AppType::WorkflowJob);
        reg.expected_start = Some(Utc::now() - ChronoDuration::minutes(5));
        assert!(service.add_registration_event(reg).await);

        assert_eq!(service.start().await, 1);
        assert!(service.is_running());

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_status, SlaEventStatus::StartMiss);

        service.shutdown();
        assert!(!service.is_running());
        assert!(service.calculator().is_empty());
    }

    #[tokio::test]
    async fn test_status_event_for_unknown_id() {
        let service = service(60);
        let tracked = service
            .add_status_event("missing", "RUNNING", EventStatus::Started, Some(Utc::now()), None)
            .await;
        assert!(!tracked);
    }
}
