//! SLA registrations derived from workflow and coordinator definitions.

use chrono::{DateTime, Utc};

use crate::instance::NodeKind;
use crate::models::{
    AppType, CoordinatorAction, CoordinatorJob, SlaRegistration, SlaTarget, WorkflowJob,
};

/// Job-level registration; nominal time defaults to the job's creation
pub fn workflow_job(job: &WorkflowJob) -> Option<SlaRegistration> {
    let declaration = job.sla()?;
    Some(declaration.resolve(
        SlaTarget {
            id: &job.id,
            app_type: AppType::WorkflowJob,
            app_name: &job.app_name,
            user: &job.user,
            parent_id: job.parent_id.as_deref(),
        },
        job.created_time,
    ))
}

/// One registration per action node that declares an SLA
pub fn workflow_actions(job: &WorkflowJob, nominal: DateTime<Utc>) -> Vec<SlaRegistration> {
    job.app
        .nodes
        .iter()
        .filter_map(|node| match &node.kind {
            NodeKind::Action { sla: Some(declaration), .. } => {
                let id = job.action_id(&node.name);
                Some(declaration.resolve(
                    SlaTarget {
                        id: &id,
                        app_type: AppType::WorkflowAction,
                        app_name: &node.name,
                        user: &job.user,
                        parent_id: Some(&job.id),
                    },
                    nominal,
                ))
            }
            _ => None,
        })
        .collect()
}

/// Registration for a materialized coordinator action, relative to its nominal time
pub fn coordinator_action(action: &CoordinatorAction, job: &CoordinatorJob) -> Option<SlaRegistration> {
    let declaration = action.sla.as_ref()?;
    Some(declaration.resolve(
        SlaTarget {
            id: &action.id,
            app_type: AppType::CoordinatorAction,
            app_name: &job.app_name,
            user: &job.user,
            parent_id: Some(&job.id),
        },
        action.nominal_time,
    ))
}
