mod common;

use common::{fast_config, started_system, ScriptedExecutor, WAIT};
use jobflow_core::events::SlaEvent;
use jobflow_core::instance::WorkflowApp;
use jobflow_core::models::{JobConf, SlaDeclaration, SlaEventStatus, SlaStatus};
use jobflow_core::sla::EventProcessed;
use jobflow_core::store::EntityStore;
use std::time::Duration;
use tokio::sync::broadcast;

fn tracked_app(sla: SlaDeclaration) -> WorkflowApp {
    WorkflowApp::builder("tracked")
        .action("only", ScriptedExecutor::ACTION_TYPE, "end", "fail")
        .end("end")
        .kill("fail", "only failed")
        .sla(sla)
        .build()
        .unwrap()
}

/// Events for `id` up to and including its end milestone
async fn events_until_end(receiver: &mut broadcast::Receiver<SlaEvent>, id: &str) -> Vec<SlaEvent> {
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, receiver.recv())
            .await
            .expect("timed out waiting for SLA events")
            .unwrap();
        if event.id != id {
            continue;
        }
        let ended = matches!(event.event_status, SlaEventStatus::EndMet | SlaEventStatus::EndMiss);
        collected.push(event);
        if ended {
            return collected;
        }
    }
}

#[tokio::test]
async fn test_fast_workflow_meets_every_milestone() {
    let system = started_system(fast_config(), ScriptedExecutor::new()).await;
    let mut receiver = system.sla_events().subscribe();

    let sla = SlaDeclaration::default()
        .should_start(5)
        .should_end(30)
        .max_duration(30);
    let job_id = system
        .workflows()
        .run(tracked_app(sla), JobConf::new(), "alice")
        .await
        .unwrap();

    let events = events_until_end(&mut receiver, &job_id).await;
    let statuses: Vec<_> = events.iter().map(|event| event.event_status).collect();
    assert_eq!(
        statuses,
        vec![
            SlaEventStatus::StartMet,
            SlaEventStatus::DurationMet,
            SlaEventStatus::EndMet
        ]
    );
    // milestone bits only accumulate
    for pair in events.windows(2) {
        assert_eq!(pair[0].event_processed & pair[1].event_processed, pair[0].event_processed);
    }
    let last = events.last().unwrap();
    assert_eq!(last.event_processed, EventProcessed::ALL);
    assert_eq!(last.sla_status, SlaStatus::Met);
    assert!(last.actual_duration_ms.is_some());

    let calculator = system.sla().unwrap().calculator();
    assert!(!calculator.contains(&job_id));
    assert!(calculator.in_history(&job_id));
    let summary = system.store().get_sla_summary(&job_id).await.unwrap();
    assert_eq!(summary.event_processed, EventProcessed::CLOSED);
    assert_eq!(summary.sla_status, SlaStatus::Met);

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_late_start_is_reported_as_miss() {
    let system = started_system(fast_config(), ScriptedExecutor::new()).await;
    let mut receiver = system.sla_events().subscribe();

    // expected to start five minutes before it was even submitted
    let sla = SlaDeclaration::default().should_start(-5);
    let job_id = system
        .workflows()
        .run(tracked_app(sla), JobConf::new(), "alice")
        .await
        .unwrap();

    let events = events_until_end(&mut receiver, &job_id).await;
    assert_eq!(events.first().unwrap().event_status, SlaEventStatus::StartMiss);
    assert_eq!(events.last().unwrap().event_status, SlaEventStatus::EndMet);
    assert!(events
        .iter()
        .all(|event| event.event_status != SlaEventStatus::DurationMet));

    system.shutdown(Duration::from_secs(5)).await.unwrap();
}
