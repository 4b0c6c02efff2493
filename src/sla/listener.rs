//! Feeds job and action lifecycle events into the SLA calculator.

use async_trait::async_trait;
use std::sync::Arc;

use super::service::SlaService;
use crate::events::{JobEvent, JobEventListener};

#[derive(Debug)]
pub struct SlaJobEventListener {
    sla: Arc<SlaService>,
}

impl SlaJobEventListener {
    pub fn new(sla: Arc<SlaService>) -> Self {
        Self { sla }
    }

    async fn apply(&self, event: &JobEvent) {
        self.sla
            .add_status_event(
                &event.id,
                &event.status,
                event.event_status,
                event.start_time,
                event.end_time,
            )
            .await;
    }
}

#[async_trait]
impl JobEventListener for SlaJobEventListener {
    fn name(&self) -> &str {
        "sla"
    }

    async fn on_workflow_job_event(&self, event: &JobEvent) {
        self.apply(event).await;
    }

    async fn on_workflow_action_event(&self, event: &JobEvent) {
        self.apply(event).await;
    }

    async fn on_coordinator_job_event(&self, event: &JobEvent) {
        self.apply(event).await;
    }

    async fn on_coordinator_action_event(&self, event: &JobEvent) {
        self.apply(event).await;
    }

    async fn on_bundle_job_event(&self, event: &JobEvent) {
        self.apply(event).await;
    }
}
