mod common;

use common::{eventually, fast_config, script_app, started_system, ScriptedExecutor};
use jobflow_core::models::JobConf;
use jobflow_core::state_machine::{WorkflowActionStatus, WorkflowJobStatus};
use jobflow_core::{EngineSystem, JobflowError};
use std::time::Duration;

async fn status_of(system: &EngineSystem, job_id: &str) -> WorkflowJobStatus {
    system.workflows().job_info(job_id).await.unwrap().status
}

async fn reaches(system: &EngineSystem, job_id: &str, wanted: WorkflowJobStatus) -> bool {
    eventually(|| async move { status_of(system, job_id).await == wanted }).await
}

#[tokio::test]
async fn test_workflow_runs_to_success() {
    let system = started_system(fast_config(), ScriptedExecutor::new()).await;
    let job_id = system
        .workflows()
        .run(script_app("etl"), JobConf::new(), "alice")
        .await
        .unwrap();
    assert!(job_id.ends_with("-it-W"), "{job_id}");

    assert!(reaches(&system, &job_id, WorkflowJobStatus::Succeeded).await);
    let job = system.workflows().job_info(&job_id).await.unwrap();
    assert!(job.start_time.is_some());
    assert!(job.end_time.is_some());
    assert!(job.error_code.is_none());

    let actions = system.workflows().actions(&job_id).await.unwrap();
    for name in ["first", "second", "end"] {
        let action = actions.iter().find(|action| action.name == name).unwrap();
        assert_eq!(action.status, WorkflowActionStatus::Ok, "{name}");
        assert_eq!(action.id, format!("{job_id}@{name}"));
    }
    assert!(actions.iter().all(|action| action.name != "fail"));

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_failing_action_routes_to_kill_node() {
    let system = started_system(fast_config(), ScriptedExecutor::new().failing("first")).await;
    let job_id = system
        .workflows()
        .run(script_app("etl"), JobConf::new(), "alice")
        .await
        .unwrap();

    assert!(reaches(&system, &job_id, WorkflowJobStatus::Killed).await);
    let actions = system.workflows().actions(&job_id).await.unwrap();
    let first = actions.iter().find(|action| action.name == "first").unwrap();
    assert_eq!(first.status, WorkflowActionStatus::Error);
    assert_eq!(first.error_code.as_deref(), Some("SCRIPT_FAILED"));
    assert!(actions.iter().all(|action| action.name != "second"));

    let kill = actions.iter().find(|action| action.name == "fail").unwrap();
    assert_eq!(
        kill.error_message.as_deref(),
        Some("first failed: first exited with 1")
    );

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_external_action_completes_through_callback() {
    let system = started_system(fast_config(), ScriptedExecutor::new().external("second")).await;
    let workflows = system.workflows();
    let job_id = workflows.run(script_app("etl"), JobConf::new(), "alice").await.unwrap();

    let second_id = format!("{job_id}@second");
    let (job, second) = (job_id.as_str(), second_id.as_str());
    assert!(
        eventually(|| async move {
            workflows
                .actions(job)
                .await
                .unwrap()
                .iter()
                .any(|action| action.id == second && action.status == WorkflowActionStatus::Running)
        })
        .await
    );
    assert_eq!(status_of(&system, &job_id).await, WorkflowJobStatus::Running);
    let running = workflows
        .actions(&job_id)
        .await
        .unwrap()
        .into_iter()
        .find(|action| action.id == second_id)
        .unwrap();
    assert_eq!(running.external_id.as_deref(), Some("ext-second"));

    workflows.action_completed(&second_id, "OK").await.unwrap();
    assert!(reaches(&system, &job_id, WorkflowJobStatus::Succeeded).await);

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_suspend_resume_and_kill() {
    let system = started_system(fast_config(), ScriptedExecutor::new().external("first")).await;
    let workflows = system.workflows();
    let job_id = workflows.run(script_app("etl"), JobConf::new(), "alice").await.unwrap();

    workflows.suspend(&job_id).await.unwrap();
    assert_eq!(status_of(&system, &job_id).await, WorkflowJobStatus::Suspended);
    assert!(matches!(
        workflows.suspend(&job_id).await,
        Err(JobflowError::InvalidState(_))
    ));

    workflows.resume(&job_id).await.unwrap();
    assert_eq!(status_of(&system, &job_id).await, WorkflowJobStatus::Running);

    workflows.kill(&job_id).await.unwrap();
    assert_eq!(status_of(&system, &job_id).await, WorkflowJobStatus::Killed);
    assert!(matches!(
        workflows.kill(&job_id).await,
        Err(JobflowError::InvalidState(_))
    ));

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_rerun_after_kill_skips_successful_nodes() {
    let system = started_system(fast_config(), ScriptedExecutor::new().failing("second")).await;
    let workflows = system.workflows();
    let job_id = workflows.run(script_app("etl"), JobConf::new(), "alice").await.unwrap();
    assert!(reaches(&system, &job_id, WorkflowJobStatus::Killed).await);
    let first_started = workflows
        .actions(&job_id)
        .await
        .unwrap()
        .into_iter()
        .find(|action| action.name == "first")
        .and_then(|action| action.start_time);

    workflows
        .rerun(&job_id, vec!["first".to_string()], JobConf::new())
        .await
        .unwrap();
    let job = workflows.job_info(&job_id).await.unwrap();
    assert_eq!(job.run, 1);
    assert!(job.end_time.is_none());

    // "second" still fails, so the re-run ends in the kill node again
    assert!(reaches(&system, &job_id, WorkflowJobStatus::Killed).await);
    let actions = workflows.actions(&job_id).await.unwrap();
    let first = actions.iter().find(|action| action.name == "first").unwrap();
    assert_eq!(first.status, WorkflowActionStatus::Ok);
    assert_eq!(first.start_time, first_started);
    let second = actions.iter().find(|action| action.name == "second").unwrap();
    assert_eq!(second.status, WorkflowActionStatus::Error);

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}
