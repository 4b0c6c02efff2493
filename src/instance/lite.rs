use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    InstanceStatus, NodeKind, StartedNode, WorkflowApp, WorkflowError, WorkflowInstance,
    WorkflowResult,
};
use crate::constants::nodes;

/// Execution path of the single sequential branch
pub const ROOT_PATH: &str = "/";

/// Sequential instance over a [`WorkflowApp`].
///
/// Each node is entered on the root path; action nodes follow `ok_to` on an `OK`
/// signal and `error_to` on `ERROR`. Any other signal value fails the workflow at
/// that node. End and kill nodes are entered like actions and finish the workflow
/// when they are signalled.
#[derive(Debug, Clone)]
pub struct LiteWorkflowInstance {
    app: Arc<WorkflowApp>,
    status: InstanceStatus,
    vars: BTreeMap<String, String>,
    /// execution path -> active node
    active: BTreeMap<String, String>,
    transitions: BTreeMap<String, String>,
    started: Vec<StartedNode>,
    to_kill: Vec<String>,
    to_fail: Vec<String>,
}

impl LiteWorkflowInstance {
    pub fn new(app: Arc<WorkflowApp>) -> Self {
        Self {
            app,
            status: InstanceStatus::Prep,
            vars: BTreeMap::new(),
            active: BTreeMap::new(),
            transitions: BTreeMap::new(),
            started: Vec::new(),
            to_kill: Vec::new(),
            to_fail: Vec::new(),
        }
    }

    /// Node currently active on a path
    pub fn active_node(&self, execution_path: &str) -> Option<&str> {
        self.active.get(execution_path).map(String::as_str)
    }

    fn enter(&mut self, execution_path: &str, node_name: &str) -> WorkflowResult<()> {
        let node = self
            .app
            .node(node_name)
            .ok_or_else(|| WorkflowError::UnknownNode(node_name.to_string()))?;
        self.started.push(StartedNode::from_node(node, execution_path));
        self.active
            .insert(execution_path.to_string(), node_name.to_string());
        Ok(())
    }

    fn finish(&mut self, status: InstanceStatus) {
        self.status = status;
        self.active.clear();
    }

    fn require(&self, operation: &str, allowed: &[InstanceStatus]) -> WorkflowResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(WorkflowError::invalid_state(operation, self.status))
        }
    }
}

impl WorkflowInstance for LiteWorkflowInstance {
    fn app(&self) -> &WorkflowApp {
        &self.app
    }

    fn status(&self) -> InstanceStatus {
        self.status
    }

    fn start(&mut self) -> WorkflowResult<bool> {
        self.require("start", &[InstanceStatus::Prep])?;
        self.status = InstanceStatus::Running;
        let start = self.app.start.clone();
        self.transitions.insert(nodes::START.to_string(), start.clone());
        self.enter(ROOT_PATH, &start)?;
        Ok(false)
    }

    fn signal(&mut self, execution_path: &str, signal_value: &str) -> WorkflowResult<bool> {
        self.require("signal", &[InstanceStatus::Running])?;
        let current = self
            .active
            .get(execution_path)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownPath(execution_path.to_string()))?;
        let app = Arc::clone(&self.app);
        let node = app
            .node(&current)
            .ok_or_else(|| WorkflowError::UnknownNode(current.clone()))?;

        match &node.kind {
            NodeKind::Action { ok_to, error_to, .. } => {
                let next = match signal_value {
                    nodes::OK => ok_to.clone(),
                    nodes::ERROR => error_to.clone(),
                    _ => {
                        self.to_fail.push(current);
                        self.finish(InstanceStatus::Failed);
                        return Ok(true);
                    }
                };
                self.transitions.insert(current, next.clone());
                self.enter(execution_path, &next)?;
                Ok(false)
            }
            NodeKind::End => {
                self.active.remove(execution_path);
                if self.active.is_empty() {
                    self.finish(InstanceStatus::Succeeded);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            NodeKind::Kill { .. } => {
                self.active.remove(execution_path);
                self.to_kill.extend(self.active.values().cloned());
                self.finish(InstanceStatus::Killed);
                Ok(true)
            }
        }
    }

    fn suspend(&mut self) -> WorkflowResult<()> {
        self.require("suspend", &[InstanceStatus::Running])?;
        self.status = InstanceStatus::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> WorkflowResult<()> {
        self.require("resume", &[InstanceStatus::Suspended])?;
        self.status = InstanceStatus::Running;
        Ok(())
    }

    fn kill(&mut self) -> WorkflowResult<()> {
        self.require(
            "kill",
            &[
                InstanceStatus::Prep,
                InstanceStatus::Running,
                InstanceStatus::Suspended,
            ],
        )?;
        self.to_kill.extend(self.active.values().cloned());
        self.finish(InstanceStatus::Killed);
        Ok(())
    }

    fn fail(&mut self, node: &str) -> WorkflowResult<()> {
        self.require(
            "fail",
            &[InstanceStatus::Running, InstanceStatus::Suspended],
        )?;
        self.to_fail.push(node.to_string());
        self.to_kill.extend(
            self.active
                .values()
                .filter(|active| active.as_str() != node)
                .cloned(),
        );
        self.finish(InstanceStatus::Failed);
        Ok(())
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    fn transition(&self, node: &str) -> Option<&str> {
        self.transitions.get(node).map(String::as_str)
    }

    fn take_started(&mut self) -> Vec<StartedNode> {
        std::mem::take(&mut self.started)
    }

    fn take_actions_to_kill(&mut self) -> Vec<String> {
        std::mem::take(&mut self.to_kill)
    }

    fn take_actions_to_fail(&mut self) -> Vec<String> {
        std::mem::take(&mut self.to_fail)
    }

    fn box_clone(&self) -> Box<dyn WorkflowInstance> {
        Box::new(self.clone())
    }
}
