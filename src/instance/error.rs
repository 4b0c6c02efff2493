use thiserror::Error;

/// Failures raised by workflow definitions and instances
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("Invalid workflow definition [{app}]: {reason}")]
    InvalidDefinition { app: String, reason: String },

    #[error("Cannot {operation} workflow instance in state {status}")]
    InvalidState { operation: String, status: String },

    #[error("Unknown node [{0}]")]
    UnknownNode(String),

    #[error("No active node on execution path [{0}]")]
    UnknownPath(String),

    #[error("Unresolved variable [{0}]")]
    UnresolvedVariable(String),

    #[error("Malformed expression: {0}")]
    MalformedExpression(String),
}

impl WorkflowError {
    pub fn invalid_state(operation: &str, status: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.to_string(),
            status: status.to_string(),
        }
    }
}
