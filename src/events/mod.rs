//! # Event System
//!
//! Job and action lifecycle events ([`JobEvent`]) fan out through the
//! [`EventHandlerService`] to [`JobEventListener`]s, one of which feeds the SLA
//! calculator. SLA milestone outcomes are broadcast separately on an
//! [`EventPublisher`] for alerting consumers.

pub mod dispatcher;
pub mod listener;
pub mod publisher;
pub mod types;

pub use dispatcher::{DispatchStats, EventHandlerService};
pub use listener::JobEventListener;
pub use publisher::{EventPublisher, SlaEvent};
pub use types::{EventStatus, JobEvent};
