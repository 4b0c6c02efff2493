//! Job id generation.
//!
//! Ids have the form `0000042-20261019120000123-jobflow-W`: a per-process sequence,
//! the generator start stamp and a type suffix. Child ids append `@name` or `@n`
//! (see [`crate::constants::child_id`]).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of top-level job an id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Workflow,
    Coordinator,
    Bundle,
}

impl JobType {
    pub fn suffix(&self) -> char {
        match self {
            Self::Workflow => 'W',
            Self::Coordinator => 'C',
            Self::Bundle => 'B',
        }
    }

    /// Job type encoded in an id, ignoring any child suffix
    pub fn of_id(id: &str) -> Option<Self> {
        let job = id.split('@').next()?;
        match job.chars().last()? {
            'W' => Some(Self::Workflow),
            'C' => Some(Self::Coordinator),
            'B' => Some(Self::Bundle),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow => write!(f, "workflow"),
            Self::Coordinator => write!(f, "coordinator"),
            Self::Bundle => write!(f, "bundle"),
        }
    }
}

#[derive(Debug)]
pub struct IdGenerator {
    system: String,
    start_stamp: String,
    sequence: AtomicU64,
}

impl IdGenerator {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            start_stamp: Utc::now().format("%Y%m%d%H%M%S%3f").to_string(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self, job_type: JobType) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!(
            "{seq:07}-{}-{}-{}",
            self.start_stamp,
            self.system,
            job_type.suffix()
        )
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new("jobflow")
    }
}
