mod common;

use common::{eventually, fast_config, past_hourly, started_system, ScriptedExecutor};
use jobflow_core::state_machine::{BundleJobStatus, CoordinatorJobStatus};
use jobflow_core::BundleRequest;
use std::time::Duration;

#[tokio::test]
async fn test_bundle_succeeds_when_every_coordinator_does() {
    let system = started_system(fast_config(), ScriptedExecutor::new()).await;
    let bundles = system.bundles();
    let request = BundleRequest::new("nightly", vec![past_hourly("ingest", 2), past_hourly("report", 1)]);
    let bundle_id = bundles.run(request, "alice").await.unwrap();
    assert!(bundle_id.ends_with("-it-B"), "{bundle_id}");

    let bundle = bundle_id.as_str();
    assert!(
        eventually(|| async move {
            bundles.job_info(bundle).await.unwrap().status == BundleJobStatus::Succeeded
        })
        .await
    );

    let bundle = bundles.job_info(&bundle_id).await.unwrap();
    assert!(bundle.end_time.is_some());
    let coordinators = bundles.coordinators(&bundle_id).await.unwrap();
    assert_eq!(coordinators.len(), 2);
    for action in &coordinators {
        let coord_id = action.coord_id.as_deref().unwrap();
        let coordinator = system.coordinators().job_info(coord_id).await.unwrap();
        assert_eq!(coordinator.status, CoordinatorJobStatus::Succeeded);
        assert_eq!(coordinator.bundle_id.as_deref(), Some(bundle_id.as_str()));
    }

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_bundle_kill_cascades_to_coordinators() {
    let system = started_system(fast_config(), ScriptedExecutor::new().external("first")).await;
    let bundles = system.bundles();
    let request = BundleRequest::new("stuck", vec![past_hourly("ingest", 2), past_hourly("report", 2)]);
    let bundle_id = bundles.run(request, "alice").await.unwrap();

    let bundle = bundle_id.as_str();
    let coordinator_engine = system.coordinators();
    let coordinator_ids = move || async move {
        bundles
            .coordinators(bundle)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|action| action.coord_id)
            .collect::<Vec<_>>()
    };
    // both coordinators submitted and running their first actions
    assert!(
        eventually(|| async move {
            let ids = coordinator_ids().await;
            if ids.len() != 2 {
                return false;
            }
            for coord_id in &ids {
                match coordinator_engine.job_info(coord_id).await {
                    Ok(job) if job.status == CoordinatorJobStatus::Running => {}
                    _ => return false,
                }
            }
            true
        })
        .await
    );

    bundles.kill(&bundle_id).await.unwrap();
    assert_eq!(bundles.job_info(&bundle_id).await.unwrap().status, BundleJobStatus::Killed);
    assert!(bundles.kill(&bundle_id).await.is_err());

    for coord_id in &coordinator_ids().await {
        assert!(
            eventually(|| async move {
                coordinator_engine.job_info(coord_id).await.unwrap().status == CoordinatorJobStatus::Killed
            })
            .await
        );
    }

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}
