//! # Bundle Commands
//!
//! A bundle groups coordinators that are submitted together when the bundle starts.
//! User transitions cascade down to the coordinators; coordinator status changes roll
//! back up through [`BundleStatusUpdateCommand`].

pub mod control;
pub mod status;
pub mod submit;

pub use control::{BundleKillCommand, BundleResumeCommand, BundleSuspendCommand};
pub use status::BundleStatusUpdateCommand;
pub use submit::{BundleStartCommand, BundleSubmitCommand};

use crate::models::BundleAction;

/// Coordinator ids of the bundle's started, non-terminal coordinators
pub(crate) fn open_coordinators(actions: &[BundleAction]) -> impl Iterator<Item = &str> {
    actions
        .iter()
        .filter(|action| !action.status.is_terminal())
        .filter_map(|action| action.coord_id.as_deref())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Duration;

    use crate::commands::coordinator::test_support::hourly;
    use crate::models::{BundleAction, BundleJob, CoordinatorJob, JobConf};
    use crate::state_machine::{BundleJobStatus, CoordinatorJobStatus};
    use crate::store::{EntityStore, InMemoryEntityStore, WriteBatch};

    /// Bundle `b-B` with coordinators `hourly` and `nightly`
    pub fn bundle() -> BundleJob {
        let mut nightly = hourly(48);
        nightly.name = "nightly".to_string();
        nightly.frequency = 24;
        nightly.end_time = nightly.start_time + Duration::days(2);
        BundleJob::new("b-B", "pipeline", vec![hourly(3), nightly], JobConf::new(), "alice")
    }

    /// Running bundle with coordinators `c-1`, `c-2` ... in the given statuses
    pub async fn seed_running(store: &InMemoryEntityStore, statuses: &[CoordinatorJobStatus]) -> BundleJob {
        let mut bundle = bundle();
        bundle.status = BundleJobStatus::Running;
        let mut batch = WriteBatch::new();
        for (index, status) in statuses.iter().enumerate() {
            let mut action = BundleAction::new(&bundle, &format!("coord{index}"));
            let mut coordinator = CoordinatorJob::from_definition(format!("c-{}", index + 1), hourly(3), "alice");
            coordinator.bundle_id = Some(bundle.id.clone());
            coordinator.status = *status;
            action.coord_id = Some(coordinator.id.clone());
            action.status = *status;
            batch.insert(action);
            batch.insert(coordinator);
        }
        batch.insert(bundle.clone());
        store.execute_batch(batch).await.unwrap();
        bundle
    }
}
