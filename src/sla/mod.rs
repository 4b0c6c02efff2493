//! # SLA Tracking
//!
//! Registration of expected start, end and duration for jobs and actions, evaluation
//! against actual status events, periodic escalation of overdue milestones and
//! restart recovery from persisted summaries.

pub mod calc_status;
pub mod calculator;
pub mod listener;
pub mod service;

pub use calc_status::{EventProcessed, SlaCalcStatus};
pub use calculator::SlaCalculator;
pub use listener::SlaJobEventListener;
pub use service::SlaService;
