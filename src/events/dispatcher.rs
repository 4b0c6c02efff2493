//! Fire-and-forget fan-out of [`JobEvent`]s to registered listeners.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::listener::JobEventListener;
use super::types::JobEvent;
use crate::models::AppType;

#[derive(Debug, Default)]
pub struct DispatchStats {
    pub queued: AtomicU64,
    pub dispatched: AtomicU64,
    pub dropped: AtomicU64,
}

/// Queues events from commands and delivers them on a background task
pub struct EventHandlerService {
    enabled: bool,
    listeners: RwLock<Vec<Arc<dyn JobEventListener>>>,
    sender: mpsc::UnboundedSender<JobEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<JobEvent>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    stats: DispatchStats,
}

impl std::fmt::Debug for EventHandlerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlerService")
            .field("enabled", &self.enabled)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl EventHandlerService {
    pub fn new(enabled: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            enabled,
            listeners: RwLock::new(Vec::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            drain: Mutex::new(None),
            stats: DispatchStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn add_listener(&self, listener: Arc<dyn JobEventListener>) {
        info!(listener = listener.name(), "Registered job event listener");
        self.listeners.write().push(listener);
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Queue an event for background delivery; never blocks
    pub fn queue_event(&self, event: JobEvent) {
        if !self.enabled {
            return;
        }
        if self.sender.send(event).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Deliver an event to every listener now
    pub async fn dispatch(&self, event: &JobEvent) {
        let listeners: Vec<Arc<dyn JobEventListener>> = self.listeners.read().clone();
        for listener in listeners {
            match event.app_type {
                AppType::WorkflowJob => listener.on_workflow_job_event(event).await,
                AppType::WorkflowAction => listener.on_workflow_action_event(event).await,
                AppType::CoordinatorJob => listener.on_coordinator_job_event(event).await,
                AppType::CoordinatorAction => listener.on_coordinator_action_event(event).await,
                AppType::BundleJob => listener.on_bundle_job_event(event).await,
            }
        }
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawn the drain task; events queued before this call are delivered first
    pub fn start(self: &Arc<Self>) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            debug!("Event drain already started");
            return;
        };
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                service.dispatch(&event).await;
            }
        });
        *self.drain.lock() = Some(handle);
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.drain.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStatus;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(AppType, String)>>,
    }

    #[async_trait]
    impl JobEventListener for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        async fn on_workflow_job_event(&self, event: &JobEvent) {
            self.seen.lock().push((event.app_type, event.id.clone()));
        }
        async fn on_workflow_action_event(&self, event: &JobEvent) {
            self.seen.lock().push((event.app_type, event.id.clone()));
        }
        async fn on_coordinator_job_event(&self, event: &JobEvent) {
            self.seen.lock().push((event.app_type, event.id.clone()));
        }
        async fn on_coordinator_action_event(&self, event: &JobEvent) {
            self.seen.lock().push((event.app_type, event.id.clone()));
        }
    }

    fn event(app_type: AppType, id: &str) -> JobEvent {
        JobEvent {
            app_type,
            id: id.to_string(),
            parent_id: None,
            user: "alice".to_string(),
            app_name: "app".to_string(),
            status: "RUNNING".to_string(),
            event_status: EventStatus::Started,
            start_time: None,
            end_time: None,
            error_code: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_queued_events_reach_listeners_in_order() {
        let service = Arc::new(EventHandlerService::new(true));
        let listener = Arc::new(Recording::default());
        service.add_listener(listener.clone());

        service.queue_event(event(AppType::WorkflowJob, "wf"));
        service.queue_event(event(AppType::CoordinatorAction, "c@1"));
        service.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while listener.seen.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let seen = listener.seen.lock().clone();
        assert_eq!(seen[0], (AppType::WorkflowJob, "wf".to_string()));
        assert_eq!(seen[1], (AppType::CoordinatorAction, "c@1".to_string()));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_disabled_service_drops_silently() {
        let service = EventHandlerService::new(false);
        service.queue_event(event(AppType::WorkflowJob, "wf"));
        assert_eq!(service.stats().queued.load(Ordering::Relaxed), 0);
    }
}
