//! In-memory SLA tracking state for one job or action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::events::SlaEvent;
use crate::models::{SlaEventStatus, SlaRegistration, SlaStatus, SlaSummary};

/// Sticky record of which SLA milestones have been evaluated.
///
/// Bits are only ever set. Start, duration and end together make 7; the persisted
/// summary uses 8 once an evicted entry has been closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventProcessed(u8);

impl EventProcessed {
    pub const START: u8 = 1;
    pub const DURATION: u8 = 2;
    pub const END: u8 = 4;
    pub const ALL: u8 = Self::START | Self::DURATION | Self::END;
    /// Summary marker for a closed entry
    pub const CLOSED: u8 = 8;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_set(&self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub fn start_processed(&self) -> bool {
        self.is_set(Self::START)
    }

    pub fn duration_processed(&self) -> bool {
        self.is_set(Self::DURATION)
    }

    pub fn end_processed(&self) -> bool {
        self.is_set(Self::END)
    }

    pub fn is_fully_processed(&self) -> bool {
        self.is_set(Self::ALL)
    }
}

impl fmt::Display for EventProcessed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live SLA state: the immutable registration plus observed actuals
#[derive(Debug, Clone, PartialEq)]
pub struct SlaCalcStatus {
    registration: SlaRegistration,
    pub job_status: Option<String>,
    pub sla_status: SlaStatus,
    pub event_status: Option<SlaEventStatus>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub actual_duration_ms: Option<i64>,
    pub event_processed: EventProcessed,
    pub last_modified: DateTime<Utc>,
}

impl SlaCalcStatus {
    pub fn new(registration: SlaRegistration) -> Self {
        Self {
            registration,
            job_status: None,
            sla_status: SlaStatus::NotStarted,
            event_status: None,
            actual_start: None,
            actual_end: None,
            actual_duration_ms: None,
            event_processed: EventProcessed::default(),
            last_modified: Utc::now(),
        }
    }

    /// Rebuild from persisted state on restart
    pub fn from_summary(summary: &SlaSummary, registration: SlaRegistration) -> Self {
        Self {
            registration,
            job_status: summary.job_status.clone(),
            sla_status: summary.sla_status,
            event_status: summary.event_status,
            actual_start: summary.actual_start,
            actual_end: summary.actual_end,
            actual_duration_ms: summary.actual_duration_ms,
            event_processed: EventProcessed::from_bits(summary.event_processed),
            last_modified: summary.last_modified,
        }
    }

    pub fn id(&self) -> &str {
        &self.registration.id
    }

    pub fn registration(&self) -> &SlaRegistration {
        &self.registration
    }

    /// Persisted projection
    pub fn to_summary(&self) -> SlaSummary {
        let mut summary = SlaSummary::from_registration(&self.registration);
        summary.created_time = self.registration.created_time;
        summary.job_status = self.job_status.clone();
        summary.sla_status = self.sla_status;
        summary.event_status = self.event_status;
        summary.actual_start = self.actual_start;
        summary.actual_end = self.actual_end;
        summary.actual_duration_ms = self.actual_duration_ms;
        summary.event_processed = self.event_processed.bits();
        summary.last_modified = self.last_modified;
        summary
    }

    /// Milestone event for the current `event_status`
    pub fn to_event(&self) -> Option<SlaEvent> {
        let event_status = self.event_status?;
        let reg = &self.registration;
        Some(SlaEvent {
            id: reg.id.clone(),
            app_type: reg.app_type,
            app_name: reg.app_name.clone(),
            user: reg.user.clone(),
            parent_id: reg.parent_id.clone(),
            event_status,
            sla_status: self.sla_status,
            job_status: self.job_status.clone(),
            expected_start: reg.expected_start,
            actual_start: self.actual_start,
            expected_end: reg.expected_end,
            actual_end: self.actual_end,
            expected_duration_ms: reg.expected_duration_ms,
            actual_duration_ms: self.actual_duration_ms,
            alert_contact: reg.alert_contact.clone(),
            event_processed: self.event_processed.bits(),
            alert: reg.alert_events.contains(&event_status),
            published_at: Utc::now(),
        })
    }

    /// Leave NOT_STARTED once the job has been seen running
    pub fn mark_in_process(&mut self) {
        if self.sla_status == SlaStatus::NotStarted {
            self.sla_status = SlaStatus::InProcess;
        }
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}
