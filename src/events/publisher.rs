use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{AppType, SlaEventStatus, SlaStatus};

/// Broadcast publisher for SLA milestone events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<SlaEvent>,
}

/// One milestone outcome for one tracked job or action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaEvent {
    pub id: String,
    pub app_type: AppType,
    pub app_name: String,
    pub user: String,
    pub parent_id: Option<String>,
    pub event_status: SlaEventStatus,
    pub sla_status: SlaStatus,
    pub job_status: Option<String>,
    pub expected_start: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub expected_end: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub expected_duration_ms: Option<i64>,
    pub actual_duration_ms: Option<i64>,
    pub alert_contact: Option<String>,
    /// Milestone bitmask after this event
    pub event_processed: u8,
    /// Whether the registration asked to be alerted for this milestone
    pub alert: bool,
    pub published_at: DateTime<Utc>,
}

impl EventPublisher {
    /// Create a new publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: SlaEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SlaEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
