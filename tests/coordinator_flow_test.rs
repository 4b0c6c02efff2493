mod common;

use common::{eventually, fast_config, past_hourly, started_system, ScriptedExecutor};
use jobflow_core::state_machine::{CoordinatorActionStatus, CoordinatorJobStatus, WorkflowJobStatus};
use std::time::Duration;

#[tokio::test]
async fn test_past_due_coordinator_runs_every_action() {
    let system = started_system(fast_config(), ScriptedExecutor::new()).await;
    let coordinators = system.coordinators();
    let coord_id = coordinators.submit(past_hourly("hourly", 3), "alice").await.unwrap();
    assert!(coord_id.ends_with("-it-C"), "{coord_id}");

    let coord = coord_id.as_str();
    assert!(
        eventually(|| async move {
            coordinators.job_info(coord).await.unwrap().status == CoordinatorJobStatus::Succeeded
        })
        .await
    );

    let job = coordinators.job_info(&coord_id).await.unwrap();
    assert!(job.done_materialization);
    assert_eq!(job.last_action_number, 3);

    let actions = coordinators.actions(&coord_id).await.unwrap();
    assert_eq!(actions.len(), 3);
    for action in &actions {
        assert_eq!(action.status, CoordinatorActionStatus::Succeeded);
        let workflow_id = action.external_id.as_deref().unwrap();
        let workflow = system.workflows().job_info(workflow_id).await.unwrap();
        assert_eq!(workflow.status, WorkflowJobStatus::Succeeded);
        assert_eq!(workflow.parent_id.as_deref(), Some(action.id.as_str()));
    }

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_killed_workflows_end_coordinator_killed() {
    let system = started_system(fast_config(), ScriptedExecutor::new().failing("second")).await;
    let coordinators = system.coordinators();
    let coord_id = coordinators.submit(past_hourly("flaky", 2), "alice").await.unwrap();

    let coord = coord_id.as_str();
    assert!(
        eventually(|| async move {
            coordinators.job_info(coord).await.unwrap().status == CoordinatorJobStatus::Killed
        })
        .await
    );
    let actions = coordinators.actions(&coord_id).await.unwrap();
    assert_eq!(actions.len(), 2);
    assert!(actions
        .iter()
        .all(|action| action.status == CoordinatorActionStatus::Killed));

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_kill_cascades_to_running_workflows() {
    let system = started_system(fast_config(), ScriptedExecutor::new().external("first")).await;
    let coordinators = system.coordinators();
    let coord_id = coordinators.submit(past_hourly("stuck", 3), "alice").await.unwrap();

    // concurrency 2 caps how many child workflows run at once
    let coord = coord_id.as_str();
    assert!(
        eventually(|| async move {
            coordinators
                .actions(coord)
                .await
                .unwrap()
                .iter()
                .filter(|action| action.status == CoordinatorActionStatus::Running)
                .count()
                == 2
        })
        .await
    );

    coordinators.kill(&coord_id).await.unwrap();
    assert_eq!(
        coordinators.job_info(&coord_id).await.unwrap().status,
        CoordinatorJobStatus::Killed
    );

    let workflow_ids: Vec<String> = coordinators
        .actions(&coord_id)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|action| action.external_id)
        .collect();
    assert_eq!(workflow_ids.len(), 2);
    let workflows = system.workflows();
    for workflow_id in &workflow_ids {
        assert!(
            eventually(|| async move {
                workflows.job_info(workflow_id).await.unwrap().status == WorkflowJobStatus::Killed
            })
            .await
        );
    }

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}
