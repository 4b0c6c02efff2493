use async_trait::async_trait;

use super::types::JobEvent;

/// Receiver of job and action lifecycle events.
///
/// Listeners are invoked from the dispatcher's drain task; a slow listener delays
/// the others but never a command.
#[async_trait]
pub trait JobEventListener: Send + Sync {
    fn name(&self) -> &str;

    async fn on_workflow_job_event(&self, event: &JobEvent);

    async fn on_workflow_action_event(&self, event: &JobEvent);

    async fn on_coordinator_job_event(&self, event: &JobEvent);

    async fn on_coordinator_action_event(&self, event: &JobEvent);

    async fn on_bundle_job_event(&self, _event: &JobEvent) {}
}
