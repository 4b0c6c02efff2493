//! # Workflow Instances
//!
//! A [`WorkflowInstance`] is the execution state of one workflow job: which nodes are
//! active on which execution path, the variables recorded so far and the transitions
//! taken. Commands drive it through `start` / `signal` and read back the nodes it
//! started, plus the actions it wants killed or failed.

pub mod definition;
pub mod error;
pub mod expression;
pub mod lite;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use definition::{NodeDef, NodeKind, WorkflowApp, WorkflowAppBuilder};
pub use error::WorkflowError;
pub use expression::{resolve_template, TemplateContext};
pub use lite::LiteWorkflowInstance;

use crate::models::SlaDeclaration;
use crate::state_machine::WorkflowJobStatus;

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Prep,
    Running,
    Suspended,
    Succeeded,
    Killed,
    Failed,
}

impl InstanceStatus {
    pub fn is_end_state(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Killed | Self::Failed)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&WorkflowJobStatus::from(*self), f)
    }
}

impl From<InstanceStatus> for WorkflowJobStatus {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Prep => Self::Prep,
            InstanceStatus::Running => Self::Running,
            InstanceStatus::Suspended => Self::Suspended,
            InstanceStatus::Succeeded => Self::Succeeded,
            InstanceStatus::Killed => Self::Killed,
            InstanceStatus::Failed => Self::Failed,
        }
    }
}

/// A node the instance entered since the last drain, to be materialized as an action
#[derive(Debug, Clone, PartialEq)]
pub struct StartedNode {
    pub name: String,
    pub node_type: String,
    pub execution_path: String,
    pub conf: BTreeMap<String, String>,
    pub retry_max: u32,
    pub retry_interval_secs: u64,
    pub sla: Option<SlaDeclaration>,
}

impl StartedNode {
    pub fn from_node(node: &NodeDef, execution_path: &str) -> Self {
        let (conf, retry_max, retry_interval_secs, sla) = match &node.kind {
            NodeKind::Action {
                conf,
                retry_max,
                retry_interval_secs,
                sla,
                ..
            } => (conf.clone(), *retry_max, *retry_interval_secs, sla.clone()),
            _ => (BTreeMap::new(), 0, 0, None),
        };
        Self {
            name: node.name.clone(),
            node_type: node.node_type().to_string(),
            execution_path: execution_path.to_string(),
            conf,
            retry_max,
            retry_interval_secs,
            sla,
        }
    }
}

/// Execution state of a workflow job.
///
/// `start` and `signal` return `true` when the whole workflow reached an end state.
pub trait WorkflowInstance: Send + Sync + fmt::Debug {
    fn app(&self) -> &WorkflowApp;

    fn status(&self) -> InstanceStatus;

    fn start(&mut self) -> WorkflowResult<bool>;

    /// Advance the node active on `execution_path` using the completed action's signal value
    fn signal(&mut self, execution_path: &str, signal_value: &str) -> WorkflowResult<bool>;

    fn suspend(&mut self) -> WorkflowResult<()>;

    fn resume(&mut self) -> WorkflowResult<()>;

    fn kill(&mut self) -> WorkflowResult<()>;

    fn fail(&mut self, node: &str) -> WorkflowResult<()>;

    fn var(&self, name: &str) -> Option<&str>;

    fn set_var(&mut self, name: &str, value: &str);

    fn vars(&self) -> &BTreeMap<String, String>;

    /// Transition taken out of `node`, once it has been signalled
    fn transition(&self, node: &str) -> Option<&str>;

    fn node(&self, name: &str) -> Option<&NodeDef> {
        self.app().node(name)
    }

    fn take_started(&mut self) -> Vec<StartedNode>;

    fn take_actions_to_kill(&mut self) -> Vec<String>;

    fn take_actions_to_fail(&mut self) -> Vec<String>;

    fn box_clone(&self) -> Box<dyn WorkflowInstance>;
}

impl Clone for Box<dyn WorkflowInstance> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
