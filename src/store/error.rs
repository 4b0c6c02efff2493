use std::fmt;
use thiserror::Error;

/// Kinds of persisted beans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeanKind {
    WorkflowJob,
    WorkflowAction,
    CoordinatorJob,
    CoordinatorAction,
    BundleJob,
    BundleAction,
    SlaRegistration,
    SlaSummary,
}

impl BeanKind {
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            Self::WorkflowAction | Self::CoordinatorAction | Self::BundleAction
        )
    }
}

impl fmt::Display for BeanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WorkflowJob => "workflow job",
            Self::WorkflowAction => "workflow action",
            Self::CoordinatorJob => "coordinator job",
            Self::CoordinatorAction => "coordinator action",
            Self::BundleJob => "bundle job",
            Self::BundleAction => "bundle action",
            Self::SlaRegistration => "SLA registration",
            Self::SlaSummary => "SLA summary",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{kind} [{id}] not found")]
    NotFound { kind: BeanKind, id: String },

    #[error("{kind} [{id}] already exists")]
    Conflict { kind: BeanKind, id: String },

    #[error("Update query {query} does not apply to {kind}")]
    InvalidQuery { query: String, kind: BeanKind },

    /// Connectivity loss; safe to retry
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: BeanKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Turn a `NotFound` read into `None`
pub trait StoreResultExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
