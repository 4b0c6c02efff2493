use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::{JobConf, SlaDeclaration};
use crate::constants::child_id;
use crate::instance::WorkflowApp;
use crate::state_machine::{CoordinatorActionStatus, CoordinatorJobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeUnit {
    /// `time` advanced by `count` units; None on overflow
    pub fn advance(&self, time: DateTime<Utc>, count: i64) -> Option<DateTime<Utc>> {
        match self {
            Self::Minute => time.checked_add_signed(Duration::try_minutes(count)?),
            Self::Hour => time.checked_add_signed(Duration::try_hours(count)?),
            Self::Day => time.checked_add_signed(Duration::try_days(count)?),
            Self::Week => time.checked_add_signed(Duration::try_weeks(count)?),
            Self::Month => time.checked_add_months(Months::new(u32::try_from(count).ok()?)),
        }
    }
}

/// Order in which READY actions are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOrder {
    #[default]
    Fifo,
    Lifo,
    /// Only the newest READY action runs; older ones are skipped
    LastOnly,
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "FIFO"),
            Self::Lifo => write!(f, "LIFO"),
            Self::LastOnly => write!(f, "LAST_ONLY"),
        }
    }
}

/// Everything needed to create a coordinator job; also used for a bundle's child coordinators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorDefinition {
    pub name: String,
    pub frequency: i64,
    pub time_unit: TimeUnit,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Max actions running at once; negative means unlimited
    #[serde(default = "default_concurrency")]
    pub concurrency: i32,
    #[serde(default)]
    pub execution_order: ExecutionOrder,
    /// Max WAITING actions; bounds materialization
    #[serde(default = "default_throttle")]
    pub mat_throttling: usize,
    /// Minutes an action may wait for inputs; negative means forever
    #[serde(default = "default_timeout")]
    pub timeout_mins: i64,
    #[serde(default)]
    pub input_dependencies: Vec<String>,
    pub workflow: WorkflowApp,
    #[serde(default)]
    pub action_sla: Option<SlaDeclaration>,
    #[serde(default)]
    pub conf: JobConf,
}

fn default_concurrency() -> i32 {
    1
}

fn default_throttle() -> usize {
    12
}

fn default_timeout() -> i64 {
    -1
}

impl CoordinatorDefinition {
    pub fn new(
        name: impl Into<String>,
        workflow: WorkflowApp,
        frequency: i64,
        time_unit: TimeUnit,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            frequency,
            time_unit,
            start_time,
            end_time,
            concurrency: default_concurrency(),
            execution_order: ExecutionOrder::Fifo,
            mat_throttling: default_throttle(),
            timeout_mins: default_timeout(),
            input_dependencies: Vec::new(),
            workflow,
            action_sla: None,
            conf: JobConf::new(),
        }
    }
}

/// Coordinator job bean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorJob {
    pub id: String,
    pub app_name: String,
    pub app_path: String,
    pub user: String,
    pub group: Option<String>,
    pub status: CoordinatorJobStatus,
    pub bundle_id: Option<String>,
    pub frequency: i64,
    pub time_unit: TimeUnit,
    pub concurrency: i32,
    pub execution_order: ExecutionOrder,
    pub mat_throttling: usize,
    pub timeout_mins: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub pause_time: Option<DateTime<Utc>>,
    /// Nominal time of the next action to materialize
    pub next_materialized_time: Option<DateTime<Utc>>,
    pub last_action_number: u32,
    pub done_materialization: bool,
    pub pending: bool,
    pub input_dependencies: Vec<String>,
    pub workflow: Arc<WorkflowApp>,
    pub action_sla: Option<SlaDeclaration>,
    pub conf: JobConf,
    pub created_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    pub suspended_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl CoordinatorJob {
    pub fn from_definition(
        id: impl Into<String>,
        definition: CoordinatorDefinition,
        user: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            app_path: definition
                .conf
                .get(crate::constants::conf::APP_PATH)
                .cloned()
                .unwrap_or_default(),
            app_name: definition.name,
            user: user.into(),
            group: None,
            status: CoordinatorJobStatus::Prep,
            bundle_id: None,
            frequency: definition.frequency,
            time_unit: definition.time_unit,
            concurrency: definition.concurrency,
            execution_order: definition.execution_order,
            mat_throttling: definition.mat_throttling,
            timeout_mins: definition.timeout_mins,
            start_time: definition.start_time,
            end_time: definition.end_time,
            pause_time: None,
            next_materialized_time: Some(definition.start_time),
            last_action_number: 0,
            done_materialization: false,
            pending: false,
            input_dependencies: definition.input_dependencies,
            workflow: Arc::new(definition.workflow),
            action_sla: definition.action_sla,
            conf: definition.conf,
            created_time: now,
            last_modified_time: now,
            suspended_time: None,
            error_message: None,
        }
    }

    pub fn action_id(&self, action_number: u32) -> String {
        child_id(&self.id, action_number)
    }

    /// Nominal time following `time`
    pub fn next_nominal(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.time_unit.advance(time, self.frequency)
    }

    pub fn has_unlimited_concurrency(&self) -> bool {
        self.concurrency < 0
    }
}

/// Coordinator action bean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorAction {
    pub id: String,
    pub job_id: String,
    pub action_number: u32,
    pub status: CoordinatorActionStatus,
    pub pending: bool,
    pub nominal_time: DateTime<Utc>,
    /// Child workflow id once submitted
    pub external_id: Option<String>,
    pub external_status: Option<String>,
    pub missing_dependencies: Vec<String>,
    pub timeout_mins: i64,
    pub run_conf: JobConf,
    pub sla: Option<SlaDeclaration>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
}

impl CoordinatorAction {
    pub fn new(job: &CoordinatorJob, action_number: u32, nominal_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        let mut run_conf = job.conf.clone();
        run_conf.insert(
            crate::constants::conf::NOMINAL_TIME.to_string(),
            nominal_time.to_rfc3339(),
        );
        Self {
            id: job.action_id(action_number),
            job_id: job.id.clone(),
            action_number,
            status: CoordinatorActionStatus::Waiting,
            pending: false,
            nominal_time,
            external_id: None,
            external_status: None,
            missing_dependencies: job.input_dependencies.clone(),
            timeout_mins: job.timeout_mins,
            run_conf,
            sla: job.action_sla.clone(),
            error_code: None,
            error_message: None,
            created_time: now,
            last_modified_time: now,
        }
    }

    /// Waited longer than its timeout for inputs
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.timeout_mins >= 0
            && Duration::try_minutes(self.timeout_mins)
                .and_then(|timeout| self.created_time.checked_add_signed(timeout))
                .is_some_and(|deadline| now > deadline)
    }
}
