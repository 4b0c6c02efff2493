//! # System Constants
//!
//! Naming conventions, configuration keys and counter names shared across commands,
//! the SLA calculator and the engines.

/// Compiled-in defaults referenced by configuration
pub mod defaults {
    pub const SLA_CAPACITY: usize = 5000;
    pub const SLA_JOB_EVENT_LATENCY_MS: i64 = 90_000;
    pub const SLA_EVENTS_MODIFIED_AFTER_DAYS: i64 = 7;
}

/// Job configuration keys
pub mod conf {
    /// Comma separated node names that suspend the workflow when reached
    pub const SUSPEND_ON_NODES: &str = "suspend.on.nodes";
    /// Application path for coordinator and bundle children
    pub const APP_PATH: &str = "app.path";
    /// Nominal time variable exposed to coordinator-launched workflows
    pub const NOMINAL_TIME: &str = "nominal.time";
    /// Parent coordinator action exposed to its workflow
    pub const PARENT_ID: &str = "parent.id";
}

/// Workflow variable conventions
pub mod vars {
    /// Suffix of the per-node skip variable, e.g. `extract#toSkip`
    pub const SKIP_SUFFIX: &str = "#toSkip";

    /// Name of the skip variable for a node
    pub fn skip_var(node: &str) -> String {
        format!("{node}{SKIP_SUFFIX}")
    }
}

/// Control node names materialized as actions
pub mod nodes {
    pub const START: &str = ":start:";
    pub const END: &str = ":END:";
    pub const KILL: &str = ":KILL:";
    /// Transition value recorded when an action completes normally
    pub const OK: &str = "OK";
    pub const ERROR: &str = "ERROR";
}

/// Instrumentation counter names
pub mod counters {
    pub const JOBS_SUBMITTED: &str = "jobs.submitted";
    pub const JOBS_SUCCEEDED: &str = "jobs.succeeded";
    pub const JOBS_FAILED: &str = "jobs.failed";
    pub const JOBS_KILLED: &str = "jobs.killed";
    pub const ACTIONS_STARTED: &str = "actions.started";
    pub const ACTIONS_ENDED: &str = "actions.ended";
    pub const COORD_ACTIONS_MATERIALIZED: &str = "coord.actions.materialized";
    pub const BUNDLES_STARTED: &str = "bundles.started";
}

/// Separator between a parent id and a child suffix
pub const CHILD_ID_SEPARATOR: char = '@';

/// Child id for a workflow action or coordinator action
pub fn child_id(parent: &str, suffix: impl std::fmt::Display) -> String {
    format!("{parent}{CHILD_ID_SEPARATOR}{suffix}")
}

/// Parent job id of a child id, if it has one
pub fn parent_of(child: &str) -> Option<&str> {
    child.rsplit_once(CHILD_ID_SEPARATOR).map(|(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_ids() {
        let id = child_id("0000001-wf", "extract");
        assert_eq!(id, "0000001-wf@extract");
        assert_eq!(parent_of(&id), Some("0000001-wf"));
        assert_eq!(parent_of("0000001-wf"), None);
        assert_eq!(vars::skip_var("extract"), "extract#toSkip");
    }
}
