#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Jobflow Core
//!
//! Execution core of a workflow / coordinator / bundle job engine.
//!
//! ## Overview
//!
//! Jobs and their actions change state only through [`execution::Command`]s. A command
//! is queued on a bounded priority queue, taken by one of the executor's workers under
//! a per-entity lock, and run through `load_state -> verify_precondition -> execute ->
//! commit`. Its writes land atomically in the [`store::EntityStore`]; only then are its
//! follow-up commands queued and its lifecycle events dispatched.
//!
//! Alongside the command path, the [`sla`] module tracks expected versus actual start,
//! end and duration of every job and action that declared an SLA, persisting a summary
//! so tracking survives restarts without re-firing milestones.
//!
//! ## Module Organization
//!
//! - [`engine`] - Workflow, coordinator and bundle request facades
//! - [`commands`] - Every job and action state transition
//! - [`execution`] - Command contract, queue, locks and the worker pool
//! - [`sla`] - SLA calculator and its sweep service
//! - [`events`] - Job lifecycle events and SLA milestone broadcast
//! - [`store`] - Entity store trait and the in-memory store
//! - [`instance`] - Workflow definitions and the sequential workflow instance
//! - [`models`] - Job, action and SLA beans
//! - [`state_machine`] - Status enums and transition guards
//! - [`config`] - Layered configuration
//! - [`bootstrap`] - System wiring and lifecycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobflow_core::bootstrap::{BootstrapConfig, EngineSystem};
//! use jobflow_core::instance::WorkflowApp;
//! use jobflow_core::models::JobConf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! jobflow_core::logging::init_structured_logging();
//! let system = EngineSystem::bootstrap(BootstrapConfig::default())?;
//! system.start().await?;
//!
//! let app = WorkflowApp::builder("etl")
//!     .action("extract", "noop", "end", "fail")
//!     .end("end")
//!     .kill("fail", "extract failed")
//!     .build()?;
//! let job_id = system.workflows().run(app, JobConf::new(), "alice").await?;
//! println!("started {job_id}");
//!
//! system.shutdown(std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod ids;
pub mod instance;
pub mod logging;
pub mod models;
pub mod sla;
pub mod state_machine;
pub mod store;

pub use bootstrap::{BootstrapConfig, EngineSystem, EngineSystemBuilder, SystemStatus};
pub use config::{ConfigManager, EngineConfig};
pub use engine::{BundleEngine, BundleRequest, CoordinatorEngine, WorkflowEngine};
pub use error::{CommandError, ErrorCode, JobflowError, Result};
pub use execution::{Command, CommandEffects, CommandExecutor, CommandOutcome, Precondition};
pub use sla::{SlaCalculator, SlaService};
