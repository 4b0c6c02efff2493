use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CoordinatorDefinition, JobConf};
use crate::constants::child_id;
use crate::state_machine::{BundleJobStatus, CoordinatorJobStatus};

/// Bundle job bean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleJob {
    pub id: String,
    pub app_name: String,
    pub app_path: String,
    pub user: String,
    pub group: Option<String>,
    pub status: BundleJobStatus,
    pub conf: JobConf,
    /// Coordinators are submitted no earlier than this
    pub kickoff_time: Option<DateTime<Utc>>,
    pub pause_time: Option<DateTime<Utc>>,
    pub coordinators: Vec<CoordinatorDefinition>,
    pub pending: bool,
    pub created_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_modified_time: DateTime<Utc>,
    pub suspended_time: Option<DateTime<Utc>>,
}

impl BundleJob {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        coordinators: Vec<CoordinatorDefinition>,
        conf: JobConf,
        user: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            app_name: name.into(),
            app_path: conf
                .get(crate::constants::conf::APP_PATH)
                .cloned()
                .unwrap_or_default(),
            user: user.into(),
            group: None,
            status: BundleJobStatus::Prep,
            conf,
            kickoff_time: None,
            pause_time: None,
            coordinators,
            pending: false,
            created_time: now,
            start_time: None,
            end_time: None,
            last_modified_time: now,
            suspended_time: None,
        }
    }

    pub fn action_id(&self, coord_name: &str) -> String {
        child_id(&self.id, coord_name)
    }
}

/// Link between a bundle and one of its coordinators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleAction {
    pub id: String,
    pub bundle_id: String,
    pub coord_name: String,
    pub coord_id: Option<String>,
    /// Last status reported by the coordinator
    pub status: CoordinatorJobStatus,
    pub pending: bool,
    pub last_modified_time: DateTime<Utc>,
}

impl BundleAction {
    pub fn new(bundle: &BundleJob, coord_name: &str) -> Self {
        Self {
            id: bundle.action_id(coord_name),
            bundle_id: bundle.id.clone(),
            coord_name: coord_name.to_string(),
            coord_id: None,
            status: CoordinatorJobStatus::Prep,
            pending: false,
            last_modified_time: Utc::now(),
        }
    }
}
