use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{JobConf, SlaDeclaration};
use crate::constants::{child_id, nodes};
use crate::error::{CommandError, ErrorCode};
use crate::instance::{LiteWorkflowInstance, StartedNode, WorkflowApp, WorkflowInstance};
use crate::state_machine::{WorkflowActionStatus, WorkflowJobStatus};

/// Workflow job bean
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: String,
    pub app_name: String,
    pub app_path: String,
    pub user: String,
    pub group: Option<String>,
    pub acl: Option<String>,
    pub status: WorkflowJobStatus,
    /// Incremented by every re-run
    pub run: u32,
    pub conf: JobConf,
    /// Coordinator action that launched this workflow
    pub parent_id: Option<String>,
    pub app: Arc<WorkflowApp>,
    pub created_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_modified_time: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub instance: Option<Box<dyn WorkflowInstance>>,
}

impl WorkflowJob {
    /// New PREP job with a fresh sequential instance
    pub fn new(id: impl Into<String>, app: WorkflowApp, conf: JobConf, user: impl Into<String>) -> Self {
        let now = Utc::now();
        let app = Arc::new(app);
        Self {
            id: id.into(),
            app_name: app.name.clone(),
            app_path: conf
                .get(crate::constants::conf::APP_PATH)
                .cloned()
                .unwrap_or_default(),
            user: user.into(),
            group: None,
            acl: None,
            status: WorkflowJobStatus::Prep,
            run: 0,
            conf,
            parent_id: None,
            instance: Some(Box::new(LiteWorkflowInstance::new(Arc::clone(&app)))),
            app,
            created_time: now,
            start_time: None,
            end_time: None,
            last_modified_time: now,
            error_code: None,
            error_message: None,
        }
    }

    pub fn instance(&self) -> Result<&dyn WorkflowInstance, CommandError> {
        self.instance
            .as_deref()
            .ok_or_else(|| CommandError::new(ErrorCode::E0720, format!("job [{}] has no instance", self.id)))
    }

    pub fn instance_mut(&mut self) -> Result<&mut (dyn WorkflowInstance + 'static), CommandError> {
        let id = &self.id;
        self.instance
            .as_deref_mut()
            .ok_or_else(|| CommandError::new(ErrorCode::E0720, format!("job [{id}] has no instance")))
    }

    /// Replace the instance with a fresh one over the same definition
    pub fn reset_instance(&mut self) {
        self.instance = Some(Box::new(LiteWorkflowInstance::new(Arc::clone(&self.app))));
    }

    pub fn set_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
    }

    pub fn sla(&self) -> Option<&SlaDeclaration> {
        self.app.sla.as_ref()
    }

    /// Id of the action materialized for a node
    pub fn action_id(&self, node: &str) -> String {
        child_id(&self.id, node)
    }
}

/// Workflow action bean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub id: String,
    pub job_id: String,
    pub name: String,
    pub action_type: String,
    pub status: WorkflowActionStatus,
    /// Post-processing outstanding; independent of `status`
    pub pending: bool,
    pub pending_age: Option<DateTime<Utc>>,
    pub execution_path: String,
    pub transition: Option<String>,
    pub signal_value: Option<String>,
    pub conf: JobConf,
    pub retries: u32,
    pub user_retry_max: u32,
    pub user_retry_interval_secs: u64,
    pub external_id: Option<String>,
    pub external_status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_check_time: Option<DateTime<Utc>>,
    pub sla: Option<SlaDeclaration>,
}

impl WorkflowAction {
    /// PREP action for a node the instance just entered
    pub fn from_started(job_id: &str, node: StartedNode) -> Self {
        Self {
            id: child_id(job_id, &node.name),
            job_id: job_id.to_string(),
            name: node.name,
            action_type: node.node_type,
            status: WorkflowActionStatus::Prep,
            pending: false,
            pending_age: None,
            execution_path: node.execution_path,
            transition: None,
            signal_value: None,
            conf: node.conf,
            retries: 0,
            user_retry_max: node.retry_max,
            user_retry_interval_secs: node.retry_interval_secs,
            external_id: None,
            external_status: None,
            error_code: None,
            error_message: None,
            created_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_check_time: None,
            sla: node.sla,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Control nodes (end / kill) complete without an executor round trip
    pub fn is_control_node(&self) -> bool {
        self.action_type == nodes::END || self.action_type == nodes::KILL
    }

    pub fn set_pending(&mut self) {
        self.pending = true;
        self.pending_age = Some(Utc::now());
    }

    pub fn reset_pending(&mut self) {
        self.pending = false;
        self.pending_age = None;
    }

    pub fn set_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
    }

    /// Record a completed execution and mark it for signalling
    pub fn complete(&mut self, status: WorkflowActionStatus, signal_value: &str) {
        self.status = status;
        self.signal_value = Some(signal_value.to_string());
        self.end_time = Some(Utc::now());
        self.set_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> WorkflowApp {
        WorkflowApp::builder("etl")
            .action("extract", "shell", "end", "fail")
            .end("end")
            .kill("fail", "failed")
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_job_is_prep_with_instance() {
        let job = WorkflowJob::new("0000001-wf-W", app(), JobConf::new(), "alice");
        assert_eq!(job.status, WorkflowJobStatus::Prep);
        assert_eq!(job.app_name, "etl");
        assert!(job.instance().is_ok());
        assert_eq!(job.action_id("extract"), "0000001-wf-W@extract");
    }

    #[test]
    fn test_cloned_job_has_independent_instance() {
        let mut job = WorkflowJob::new("wf", app(), JobConf::new(), "alice");
        let snapshot = job.clone();
        job.instance_mut().unwrap().start().unwrap();
        assert_eq!(
            snapshot.instance().unwrap().status(),
            crate::instance::InstanceStatus::Prep
        );
    }

    #[test]
    fn test_action_pending_is_independent_of_status() {
        let mut job = WorkflowJob::new("wf", app(), JobConf::new(), "alice");
        let instance = job.instance_mut().unwrap();
        instance.start().unwrap();
        let started = instance.take_started().remove(0);
        let mut action = WorkflowAction::from_started("wf", started);
        assert_eq!(action.id, "wf@extract");
        action.complete(WorkflowActionStatus::Ok, "OK");
        assert!(action.is_complete() && action.pending);
        action.reset_pending();
        assert!(action.is_complete() && !action.pending);
    }
}
