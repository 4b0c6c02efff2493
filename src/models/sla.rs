//! SLA declarations, registrations and persisted summaries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse SLA state of a tracked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaStatus {
    NotStarted,
    InProcess,
    Met,
    Miss,
}

impl fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::InProcess => write!(f, "IN_PROCESS"),
            Self::Met => write!(f, "MET"),
            Self::Miss => write!(f, "MISS"),
        }
    }
}

/// Fine-grained milestone outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaEventStatus {
    StartMet,
    StartMiss,
    DurationMet,
    DurationMiss,
    EndMet,
    EndMiss,
}

impl SlaEventStatus {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::StartMiss | Self::DurationMiss | Self::EndMiss)
    }
}

impl fmt::Display for SlaEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartMet => "START_MET",
            Self::StartMiss => "START_MISS",
            Self::DurationMet => "DURATION_MET",
            Self::DurationMiss => "DURATION_MISS",
            Self::EndMet => "END_MET",
            Self::EndMiss => "END_MISS",
        };
        f.write_str(name)
    }
}

/// Kind of entity an SLA is tracked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppType {
    WorkflowJob,
    WorkflowAction,
    CoordinatorJob,
    CoordinatorAction,
    BundleJob,
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WorkflowJob => "WORKFLOW_JOB",
            Self::WorkflowAction => "WORKFLOW_ACTION",
            Self::CoordinatorJob => "COORDINATOR_JOB",
            Self::CoordinatorAction => "COORDINATOR_ACTION",
            Self::BundleJob => "BUNDLE_JOB",
        };
        f.write_str(name)
    }
}

/// SLA as declared on a workflow, action node or coordinator.
///
/// Offsets are minutes relative to the nominal time, which is either declared here or
/// supplied by the owner (a coordinator action's nominal time, a job's creation time).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaDeclaration {
    #[serde(default)]
    pub nominal_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub should_start_mins: Option<i64>,
    #[serde(default)]
    pub should_end_mins: Option<i64>,
    #[serde(default)]
    pub max_duration_mins: Option<i64>,
    #[serde(default)]
    pub alert_events: Vec<SlaEventStatus>,
    #[serde(default)]
    pub alert_contact: Option<String>,
    #[serde(default)]
    pub notification_msg: Option<String>,
    #[serde(default)]
    pub upstream_apps: Vec<String>,
}

impl SlaDeclaration {
    pub fn should_start(mut self, minutes: i64) -> Self {
        self.should_start_mins = Some(minutes);
        self
    }

    pub fn should_end(mut self, minutes: i64) -> Self {
        self.should_end_mins = Some(minutes);
        self
    }

    pub fn max_duration(mut self, minutes: i64) -> Self {
        self.max_duration_mins = Some(minutes);
        self
    }

    pub fn nominal(mut self, nominal_time: DateTime<Utc>) -> Self {
        self.nominal_time = Some(nominal_time);
        self
    }

    /// Absolute expectations for a concrete entity
    pub fn resolve(&self, target: SlaTarget<'_>, default_nominal: DateTime<Utc>) -> SlaRegistration {
        let nominal = self.nominal_time.unwrap_or(default_nominal);
        SlaRegistration {
            id: target.id.to_string(),
            app_type: target.app_type,
            app_name: target.app_name.to_string(),
            user: target.user.to_string(),
            parent_id: target.parent_id.map(str::to_string),
            nominal_time: Some(nominal),
            expected_start: self
                .should_start_mins
                .map(|mins| nominal + Duration::minutes(mins)),
            expected_end: self
                .should_end_mins
                .map(|mins| nominal + Duration::minutes(mins)),
            expected_duration_ms: self.max_duration_mins.map(|mins| mins * 60_000),
            alert_events: self.alert_events.clone(),
            alert_contact: self.alert_contact.clone(),
            notification_msg: self.notification_msg.clone(),
            upstream_apps: self.upstream_apps.clone(),
            created_time: Utc::now(),
        }
    }
}

/// Identity of the entity a declaration is resolved for
#[derive(Debug, Clone, Copy)]
pub struct SlaTarget<'a> {
    pub id: &'a str,
    pub app_type: AppType,
    pub app_name: &'a str,
    pub user: &'a str,
    pub parent_id: Option<&'a str>,
}

/// Registered expectations for one job or action; immutable once registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaRegistration {
    pub id: String,
    pub app_type: AppType,
    pub app_name: String,
    pub user: String,
    pub parent_id: Option<String>,
    pub nominal_time: Option<DateTime<Utc>>,
    pub expected_start: Option<DateTime<Utc>>,
    pub expected_end: Option<DateTime<Utc>>,
    /// None when no duration is expected
    pub expected_duration_ms: Option<i64>,
    pub alert_events: Vec<SlaEventStatus>,
    pub alert_contact: Option<String>,
    pub notification_msg: Option<String>,
    pub upstream_apps: Vec<String>,
    pub created_time: DateTime<Utc>,
}

impl SlaRegistration {
    /// Registration with no expectations, for tests and restart reconstruction
    pub fn new(id: impl Into<String>, app_type: AppType) -> Self {
        Self {
            id: id.into(),
            app_type,
            app_name: String::new(),
            user: String::new(),
            parent_id: None,
            nominal_time: None,
            expected_start: None,
            expected_end: None,
            expected_duration_ms: None,
            alert_events: Vec::new(),
            alert_contact: None,
            notification_msg: None,
            upstream_apps: Vec::new(),
            created_time: Utc::now(),
        }
    }
}

/// Persisted projection of an SLA calculator entry; authoritative across restarts.
///
/// `event_processed` holds the milestone bitmask (0-7), or 8 once the entry was closed
/// after eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaSummary {
    pub id: String,
    pub app_type: AppType,
    pub app_name: String,
    pub user: String,
    pub parent_id: Option<String>,
    pub nominal_time: Option<DateTime<Utc>>,
    pub expected_start: Option<DateTime<Utc>>,
    pub expected_end: Option<DateTime<Utc>>,
    pub expected_duration_ms: Option<i64>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub actual_duration_ms: Option<i64>,
    pub job_status: Option<String>,
    pub event_status: Option<SlaEventStatus>,
    pub sla_status: SlaStatus,
    pub event_processed: u8,
    pub last_modified: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
}

impl SlaSummary {
    /// Fresh summary for a new registration
    pub fn from_registration(reg: &SlaRegistration) -> Self {
        let now = Utc::now();
        Self {
            id: reg.id.clone(),
            app_type: reg.app_type,
            app_name: reg.app_name.clone(),
            user: reg.user.clone(),
            parent_id: reg.parent_id.clone(),
            nominal_time: reg.nominal_time,
            expected_start: reg.expected_start,
            expected_end: reg.expected_end,
            expected_duration_ms: reg.expected_duration_ms,
            actual_start: None,
            actual_end: None,
            actual_duration_ms: None,
            job_status: None,
            event_status: None,
            sla_status: SlaStatus::NotStarted,
            event_processed: 0,
            last_modified: now,
            created_time: now,
        }
    }
}
