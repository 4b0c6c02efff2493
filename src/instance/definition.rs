//! Workflow application definitions: a start transition, action nodes with ok/error
//! transitions, and end / kill control nodes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::error::WorkflowError;
use crate::constants::nodes;
use crate::models::SlaDeclaration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowApp {
    pub name: String,
    /// Node the start transition points at
    pub start: String,
    pub nodes: Vec<NodeDef>,
    /// Job-level SLA
    #[serde(default)]
    pub sla: Option<SlaDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Action {
        action_type: String,
        #[serde(default)]
        conf: BTreeMap<String, String>,
        ok_to: String,
        error_to: String,
        #[serde(default)]
        retry_max: u32,
        #[serde(default)]
        retry_interval_secs: u64,
        #[serde(default)]
        sla: Option<SlaDeclaration>,
    },
    End,
    Kill {
        /// Message template, `${var}` references resolved at kill time
        message: String,
    },
}

impl NodeDef {
    /// Action type recorded on the materialized action
    pub fn node_type(&self) -> &str {
        match &self.kind {
            NodeKind::Action { action_type, .. } => action_type,
            NodeKind::End => nodes::END,
            NodeKind::Kill { .. } => nodes::KILL,
        }
    }

    pub fn is_kill(&self) -> bool {
        matches!(self.kind, NodeKind::Kill { .. })
    }

    pub fn sla(&self) -> Option<&SlaDeclaration> {
        match &self.kind {
            NodeKind::Action { sla, .. } => sla.as_ref(),
            _ => None,
        }
    }

    fn targets(&self) -> Vec<&str> {
        match &self.kind {
            NodeKind::Action { ok_to, error_to, .. } => vec![ok_to.as_str(), error_to.as_str()],
            _ => Vec::new(),
        }
    }
}

impl WorkflowApp {
    pub fn builder(name: impl Into<String>) -> WorkflowAppBuilder {
        WorkflowAppBuilder {
            name: name.into(),
            start: None,
            nodes: Vec::new(),
            sla: None,
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Action nodes that declare an SLA
    pub fn nodes_with_sla(&self) -> impl Iterator<Item = (&NodeDef, &SlaDeclaration)> {
        self.nodes
            .iter()
            .filter_map(|node| node.sla().map(|sla| (node, sla)))
    }

    /// Check name uniqueness and that every transition resolves
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |reason: String| WorkflowError::InvalidDefinition {
            app: self.name.clone(),
            reason,
        };

        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(invalid(format!("duplicate node [{}]", node.name)));
            }
        }
        if !names.contains(self.start.as_str()) {
            return Err(invalid(format!("start transition to unknown node [{}]", self.start)));
        }
        for node in &self.nodes {
            for target in node.targets() {
                if !names.contains(target) {
                    return Err(invalid(format!(
                        "node [{}] transitions to unknown node [{target}]",
                        node.name
                    )));
                }
            }
        }
        if !self.nodes.iter().any(|node| matches!(node.kind, NodeKind::End)) {
            return Err(invalid("no end node".to_string()));
        }
        Ok(())
    }
}

pub struct WorkflowAppBuilder {
    name: String,
    start: Option<String>,
    nodes: Vec<NodeDef>,
    sla: Option<SlaDeclaration>,
}

impl WorkflowAppBuilder {
    /// Adds an action node; the first action added becomes the start node
    pub fn action(
        mut self,
        name: &str,
        action_type: &str,
        ok_to: &str,
        error_to: &str,
    ) -> Self {
        self.start.get_or_insert_with(|| name.to_string());
        self.nodes.push(NodeDef {
            name: name.to_string(),
            kind: NodeKind::Action {
                action_type: action_type.to_string(),
                conf: BTreeMap::new(),
                ok_to: ok_to.to_string(),
                error_to: error_to.to_string(),
                retry_max: 0,
                retry_interval_secs: 0,
                sla: None,
            },
        });
        self
    }

    /// Attach retry settings to the most recently added action
    pub fn with_retries(mut self, retry_max: u32, retry_interval_secs: u64) -> Self {
        if let Some(NodeKind::Action {
            retry_max: max,
            retry_interval_secs: interval,
            ..
        }) = self.nodes.last_mut().map(|node| &mut node.kind)
        {
            *max = retry_max;
            *interval = retry_interval_secs;
        }
        self
    }

    /// Attach an SLA to the most recently added action
    pub fn with_action_sla(mut self, declaration: SlaDeclaration) -> Self {
        if let Some(NodeKind::Action { sla, .. }) = self.nodes.last_mut().map(|node| &mut node.kind)
        {
            *sla = Some(declaration);
        }
        self
    }

    pub fn with_conf(mut self, key: &str, value: &str) -> Self {
        if let Some(NodeKind::Action { conf, .. }) = self.nodes.last_mut().map(|node| &mut node.kind)
        {
            conf.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn end(mut self, name: &str) -> Self {
        self.nodes.push(NodeDef {
            name: name.to_string(),
            kind: NodeKind::End,
        });
        self
    }

    pub fn kill(mut self, name: &str, message: &str) -> Self {
        self.nodes.push(NodeDef {
            name: name.to_string(),
            kind: NodeKind::Kill {
                message: message.to_string(),
            },
        });
        self
    }

    pub fn start_at(mut self, node: &str) -> Self {
        self.start = Some(node.to_string());
        self
    }

    pub fn sla(mut self, declaration: SlaDeclaration) -> Self {
        self.sla = Some(declaration);
        self
    }

    pub fn build(self) -> Result<WorkflowApp, WorkflowError> {
        let start = self.start.ok_or_else(|| WorkflowError::InvalidDefinition {
            app: self.name.clone(),
            reason: "no start node".to_string(),
        })?;
        let app = WorkflowApp {
            name: self.name,
            start,
            nodes: self.nodes,
            sla: self.sla,
        };
        app.validate()?;
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_validates_transitions() {
        let err = WorkflowApp::builder("broken")
            .action("a", "shell", "missing", "fail")
            .end("end")
            .kill("fail", "failed")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("missing"));

        let app = WorkflowApp::builder("ok")
            .action("a", "shell", "end", "fail")
            .end("end")
            .kill("fail", "failed")
            .build()
            .unwrap();
        assert_eq!(app.start, "a");
        assert_eq!(app.node("end").unwrap().node_type(), nodes::END);
        assert!(app.node("fail").unwrap().is_kill());
    }

    #[test]
    fn test_definition_serde() {
        let app = WorkflowApp::builder("serde")
            .action("a", "shell", "end", "end")
            .with_retries(2, 10)
            .end("end")
            .build()
            .unwrap();
        let json = serde_json::to_string(&app).unwrap();
        assert!(json.contains("\"type\":\"action\""));
        let back: WorkflowApp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, app);
    }
}
