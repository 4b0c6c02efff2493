//! # Data Models
//!
//! Job and action beans for workflows, coordinators and bundles, the SLA beans, and
//! the [`Job`] union over the three job variants.

pub mod bundle;
pub mod coordinator;
pub mod job;
pub mod sla;
pub mod workflow;

use std::collections::BTreeMap;

pub use bundle::{BundleAction, BundleJob};
pub use coordinator::{
    CoordinatorAction, CoordinatorDefinition, CoordinatorJob, ExecutionOrder, TimeUnit,
};
pub use job::{Job, JobBean};
pub use sla::{
    AppType, SlaDeclaration, SlaEventStatus, SlaRegistration, SlaStatus, SlaSummary, SlaTarget,
};
pub use workflow::{WorkflowAction, WorkflowJob};

/// Job configuration properties
pub type JobConf = BTreeMap<String, String>;
