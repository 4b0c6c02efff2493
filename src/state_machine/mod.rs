// Status enums for every job and action variant, plus the guards commands apply
// before changing a status field.

pub mod guards;
pub mod states;

pub use states::{
    BundleJobStatus, CoordinatorActionStatus, CoordinatorJobStatus, WorkflowActionStatus,
    WorkflowJobStatus,
};
