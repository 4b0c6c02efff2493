//! # SLA Calculator
//!
//! Tracks expected against actual timing for every registered job and action. Live
//! entries sit in a map keyed by job id, each behind its own async mutex so the
//! periodic sweep and event-driven updates for the same id never interleave. Once the
//! start, duration and end milestones have all been evaluated the entry is evicted
//! and its id moved to the history set; the persisted [`SlaSummary`] stays the source
//! of truth.
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use jobflow_core::config::SlaConfig;
//! use jobflow_core::events::{EventPublisher, EventStatus};
//! use jobflow_core::models::{AppType, SlaEventStatus, SlaRegistration};
//! use jobflow_core::sla::SlaCalculator;
//! use jobflow_core::store::InMemoryEntityStore;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//! let calculator = SlaCalculator::new(
//!     Arc::new(InMemoryEntityStore::new()),
//!     publisher,
//!     &SlaConfig::default(),
//! );
//!
//! let mut registration = SlaRegistration::new("0000001-wf-W", AppType::WorkflowJob);
//! registration.expected_start = Some(Utc::now() + Duration::minutes(10));
//! calculator.add_registration(registration).await.unwrap();
//!
//! calculator
//!     .add_job_status("0000001-wf-W", "RUNNING", EventStatus::Started, Some(Utc::now()), None)
//!     .await
//!     .unwrap();
//! assert_eq!(events.recv().await.unwrap().event_status, SlaEventStatus::StartMet);
//! # });
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::calc_status::{EventProcessed, SlaCalcStatus};
use crate::config::SlaConfig;
use crate::events::{EventPublisher, EventStatus, SlaEvent};
use crate::models::{AppType, SlaEventStatus, SlaRegistration, SlaStatus, SlaSummary};
use crate::state_machine::{
    CoordinatorActionStatus, WorkflowActionStatus, WorkflowJobStatus,
};
use crate::store::{BeanKind, EntityStore, StoreError, StoreResult, UpdateQuery, WriteBatch};

type Entry = Arc<Mutex<SlaCalcStatus>>;

pub struct SlaCalculator {
    store: Arc<dyn EntityStore>,
    publisher: EventPublisher,
    capacity: usize,
    job_event_latency: ChronoDuration,
    modified_after_days: i64,
    map: DashMap<String, Entry>,
    history: DashSet<String>,
}

impl std::fmt::Debug for SlaCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaCalculator")
            .field("capacity", &self.capacity)
            .field("size", &self.map.len())
            .field("history", &self.history.len())
            .finish()
    }
}

impl SlaCalculator {
    pub fn new(store: Arc<dyn EntityStore>, publisher: EventPublisher, config: &SlaConfig) -> Self {
        Self {
            store,
            publisher,
            capacity: config.capacity,
            job_event_latency: ChronoDuration::milliseconds(config.job_event_latency_ms),
            modified_after_days: config.events_modified_after_days,
            map: DashMap::new(),
            history: DashSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    pub fn in_history(&self, id: &str) -> bool {
        self.history.contains(id)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Snapshot of a live entry
    pub async fn get(&self, id: &str) -> Option<SlaCalcStatus> {
        let entry = self.entry(id)?;
        let status = entry.lock().await;
        Some(status.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.map.clear();
        self.history.clear();
    }

    fn entry(&self, id: &str) -> Option<Entry> {
        self.map.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn evict(&self, id: &str) {
        self.map.remove(id);
        self.history.insert(id.to_string());
        trace!(sla_id = id, "Removed SLA entry from map after end processed");
    }

    /// Start tracking a new registration; `false` when the map is at capacity
    pub async fn add_registration(&self, registration: SlaRegistration) -> StoreResult<bool> {
        let Some(status) = self.admit(registration) else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        batch
            .insert(status.registration().clone())
            .insert(status.to_summary());
        self.store.execute_batch(batch).await?;
        self.track(status);
        Ok(true)
    }

    /// Replace the registration for an id, restarting its tracking
    pub async fn update_registration(&self, registration: SlaRegistration) -> StoreResult<bool> {
        let Some(status) = self.admit(registration) else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        batch
            .update(status.registration().clone())
            .update(status.to_summary());
        self.store.execute_batch(batch).await?;
        self.history.remove(status.id());
        self.track(status);
        Ok(true)
    }

    fn admit(&self, registration: SlaRegistration) -> Option<SlaCalcStatus> {
        if self.map.len() >= self.capacity {
            crate::log_sla!(
                error,
                "capacity_reached",
                sla_id: registration.id,
                capacity: self.capacity,
            );
            return None;
        }
        let mut status = SlaCalcStatus::new(registration);
        status.job_status = initial_job_status(status.registration().app_type);
        Some(status)
    }

    fn track(&self, status: SlaCalcStatus) {
        let id = status.id().to_string();
        debug!(sla_id = %id, "SLA registration event");
        self.map.insert(id, Arc::new(Mutex::new(status)));
    }

    /// Apply a job status event; `false` when the id has no SLA
    pub async fn add_job_status(
        &self,
        id: &str,
        job_status: &str,
        event_status: EventStatus,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        if let Some(entry) = self.entry(id) {
            let mut events = Vec::new();
            let mut status = entry.lock().await;
            status.job_status = Some(job_status.to_string());
            match event_status {
                EventStatus::Started => process_start(&mut status, start, &mut events),
                EventStatus::Success => process_end_success(&mut status, start, end, &mut events),
                EventStatus::Failure => process_end_failure(&mut status, start, end, &mut events),
                EventStatus::Suspend => {
                    debug!(sla_id = id, event_status = %event_status, "Event status has no SLA effect");
                }
            }
            status.touch();

            let mut summary = status.to_summary();
            let closed = status.event_processed.is_fully_processed();
            if closed {
                summary.event_processed = EventProcessed::CLOSED;
            }
            // milestones are already marked in memory, so their events go out even if
            // the write fails; the entry stays live until a write lands
            let persisted = self
                .persist(UpdateQuery::SlaSummaryStatusActualTimes, summary)
                .await;
            if closed && persisted.is_ok() {
                self.evict(id);
            }
            drop(status);

            self.publish(events);
            persisted?;
            trace!(sla_id = id, event_status = %event_status, "SLA status event");
            return Ok(true);
        }

        if self.history.contains(id) {
            let mut summary = self.store.get_sla_summary(id).await?;
            summary.job_status = Some(job_status.to_string());
            summary.actual_start = start;
            summary.actual_end = end;
            if let (Some(start), Some(end)) = (start, end) {
                summary.actual_duration_ms = Some((end - start).num_milliseconds());
            }
            summary.event_processed = EventProcessed::CLOSED;
            summary.last_modified = Utc::now();
            self.persist(UpdateQuery::SlaSummaryStatusActualTimes, summary)
                .await?;
            self.history.remove(id);
            return Ok(true);
        }

        Ok(false)
    }

    /// Sweep one entry against the current time
    pub async fn update_sla_status(&self, id: &str) -> StoreResult<bool> {
        self.update_sla_status_at(id, Utc::now()).await
    }

    /// Escalate milestones whose deadline plus latency has passed by `now`
    pub async fn update_sla_status_at(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let Some(entry) = self.entry(id) else {
            return Ok(false);
        };
        let mut events = Vec::new();
        let mut status = entry.lock().await;
        let latency = self.job_event_latency;
        let (expected_start, expected_end, expected_duration_ms) = {
            let reg = status.registration();
            (reg.expected_start, reg.expected_end, reg.expected_duration_ms)
        };
        let mut changed = false;

        if !status.event_processed.start_processed() {
            match expected_start {
                Some(expected) => {
                    if expected + latency < now {
                        status.event_status = Some(SlaEventStatus::StartMiss);
                        status.event_processed.set(EventProcessed::START);
                        events.extend(status.to_event());
                        changed = true;
                    }
                }
                None => {
                    status.event_processed.set(EventProcessed::START);
                    changed = true;
                }
            }
        }

        if !status.event_processed.duration_processed() {
            match expected_duration_ms {
                None => {
                    status.event_processed.set(EventProcessed::DURATION);
                    changed = true;
                }
                Some(expected_ms) => {
                    if let Some(actual_start) = status.actual_start {
                        let elapsed = now - actual_start;
                        if ChronoDuration::milliseconds(expected_ms) + latency < elapsed {
                            status.event_status = Some(SlaEventStatus::DurationMiss);
                            status.event_processed.set(EventProcessed::DURATION);
                            events.extend(status.to_event());
                            changed = true;
                        }
                    }
                }
            }
        }

        if !status.event_processed.end_processed() {
            if let Some(expected) = expected_end {
                if expected + latency < now {
                    status.event_status = Some(SlaEventStatus::EndMiss);
                    status.sla_status = SlaStatus::Miss;
                    status.event_processed.set(EventProcessed::END);
                    events.extend(status.to_event());
                    changed = true;
                }
            }
        }

        // a fully processed entry still here lost its last write
        let unsaved = status.event_processed.is_fully_processed();
        let mut persisted = Ok(());
        if changed || unsaved {
            if changed {
                status.touch();
            }
            persisted = self
                .persist(UpdateQuery::SlaSummaryStatus, status.to_summary())
                .await;
            if unsaved && persisted.is_ok() {
                self.evict(id);
            }
        }
        drop(status);
        self.publish(events);
        persisted?;
        Ok(changed)
    }

    pub async fn update_all_sla_status(&self) -> usize {
        self.update_all_sla_status_at(Utc::now()).await
    }

    /// Sweep every live entry; failures are logged per entry. Returns the number changed.
    pub async fn update_all_sla_status_at(&self, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for id in self.ids() {
            match self.update_sla_status_at(&id, now).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(sla_id = %id, error = %err, "Exception in SLA processing for job");
                }
            }
        }
        changed
    }

    /// Rebuild the map from summaries modified within the recency window.
    ///
    /// Each record is reconciled against the live job or action status first. A record
    /// that fails to load is logged and skipped. Returns the number of entries reloaded.
    pub async fn load_on_restart(&self) -> usize {
        let modified_after = Utc::now() - ChronoDuration::days(self.modified_after_days);
        let summaries = match self.store.sla_summaries_for_restart(modified_after).await {
            Ok(summaries) => summaries,
            Err(err) => {
                warn!(error = %err, "Failed to retrieve SLA summary records on restart");
                return 0;
            }
        };

        let mut loaded = 0;
        for mut summary in summaries {
            let id = summary.id.clone();
            match self.reconcile(&mut summary).await {
                Ok(true) => {
                    if let Err(err) = self
                        .persist(UpdateQuery::SlaSummaryStatusActualTimes, summary.clone())
                        .await
                    {
                        warn!(sla_id = %id, error = %err, "Failed to update SLA summary on restart");
                    }
                }
                Ok(false) => {}
                Err(err) => warn!(sla_id = %id, error = %err, "Failed to load records for job"),
            }

            if summary.event_processed == EventProcessed::ALL {
                self.history.insert(id);
            } else if summary.event_processed < EventProcessed::ALL {
                match self.store.get_sla_registration(&id).await {
                    Ok(registration) => {
                        let status = SlaCalcStatus::from_summary(&summary, registration);
                        self.map.insert(id, Arc::new(Mutex::new(status)));
                        loaded += 1;
                    }
                    Err(err) => {
                        warn!(sla_id = %id, error = %err, "Failed to fetch SLA registration on restart");
                    }
                }
            }
        }
        info!(loaded, history = self.history.len(), "Loaded SLA entries on restart");
        loaded
    }

    /// Bring a summary in line with its job's persisted status; `true` if it changed
    async fn reconcile(&self, summary: &mut SlaSummary) -> StoreResult<bool> {
        let (status, terminal, started, start, end) = match summary.app_type {
            AppType::CoordinatorAction => {
                let action = self.store.get_coordinator_action(&summary.id).await?;
                let status = action.status.to_string();
                if summary.job_status.as_deref() == Some(status.as_str()) {
                    return Ok(false);
                }
                let started = action.status != CoordinatorActionStatus::Waiting;
                let workflow_start = if action.status.is_terminal() || started {
                    self.child_workflow_start(action.external_id.as_deref()).await?
                } else {
                    None
                };
                (
                    status,
                    action.status.is_terminal(),
                    started,
                    workflow_start,
                    Some(action.last_modified_time),
                )
            }
            AppType::WorkflowAction => {
                let action = self.store.get_workflow_action(&summary.id).await?;
                let status = action.status.to_string();
                if summary.job_status.as_deref() == Some(status.as_str()) {
                    return Ok(false);
                }
                (
                    status,
                    action.status.is_complete(),
                    action.status != WorkflowActionStatus::Prep,
                    action.start_time,
                    action.end_time,
                )
            }
            AppType::WorkflowJob => {
                let job = self.store.get_workflow_job(&summary.id).await?;
                let status = job.status.to_string();
                if summary.job_status.as_deref() == Some(status.as_str()) {
                    return Ok(false);
                }
                (
                    status,
                    job.status.is_terminal(),
                    job.status != WorkflowJobStatus::Prep,
                    job.start_time,
                    job.end_time,
                )
            }
            AppType::CoordinatorJob | AppType::BundleJob => return Ok(false),
        };

        trace!(sla_id = %summary.id, status = %status, summary_status = ?summary.job_status, "Reconciling SLA summary");
        summary.job_status = Some(status.clone());
        if terminal {
            close_summary(summary, start, end, &status);
        } else if started {
            mark_summary_started(summary, start);
        }
        summary.last_modified = Utc::now();
        Ok(true)
    }

    async fn child_workflow_start(&self, workflow_id: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
        let Some(workflow_id) = workflow_id else {
            return Err(StoreError::not_found(BeanKind::WorkflowJob, "<none>"));
        };
        Ok(self.store.get_workflow_job(workflow_id).await?.start_time)
    }

    async fn persist(&self, query: UpdateQuery, summary: SlaSummary) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.update_with(query, summary);
        self.store.execute_batch(batch).await
    }

    fn publish(&self, events: Vec<SlaEvent>) {
        for event in events {
            crate::log_sla!(
                debug,
                "milestone",
                sla_id: event.id,
                event_status: event.event_status,
                sla_status: event.sla_status,
            );
            self.publisher.publish(event);
        }
    }
}

fn initial_job_status(app_type: AppType) -> Option<String> {
    match app_type {
        AppType::CoordinatorAction => Some(CoordinatorActionStatus::Waiting.to_string()),
        AppType::WorkflowAction => Some(WorkflowActionStatus::Prep.to_string()),
        AppType::WorkflowJob => Some(WorkflowJobStatus::Prep.to_string()),
        AppType::CoordinatorJob | AppType::BundleJob => None,
    }
}

fn is_success_status(status: &str) -> bool {
    status == WorkflowJobStatus::Succeeded.as_str()
        || status == WorkflowActionStatus::Ok.as_str()
        || status == CoordinatorActionStatus::Succeeded.as_str()
}

fn duration_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
        _ => None,
    }
}

fn process_start(status: &mut SlaCalcStatus, start: Option<DateTime<Utc>>, events: &mut Vec<SlaEvent>) {
    status.actual_start = start;
    status.mark_in_process();
    if status.event_processed.start_processed() {
        return;
    }
    if let (Some(expected), Some(actual)) = (status.registration().expected_start, start) {
        status.event_status = Some(if actual > expected {
            SlaEventStatus::StartMiss
        } else {
            SlaEventStatus::StartMet
        });
        events.extend(status.to_event());
    }
    status.event_processed.set(EventProcessed::START);
}

/// Shared duration evaluation for both end handlers
fn process_duration(status: &mut SlaCalcStatus, events: &mut Vec<SlaEvent>) {
    if status.event_processed.duration_processed() {
        return;
    }
    if let (Some(expected), Some(actual)) =
        (status.registration().expected_duration_ms, status.actual_duration_ms)
    {
        status.event_status = Some(if actual > expected {
            SlaEventStatus::DurationMiss
        } else {
            SlaEventStatus::DurationMet
        });
        events.extend(status.to_event());
    }
    status.event_processed.set(EventProcessed::DURATION);
}

fn record_actuals(status: &mut SlaCalcStatus, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
    if start.is_some() {
        status.actual_start = start;
    }
    status.actual_end = end;
    status.actual_duration_ms = duration_ms(status.actual_start, end);
}

fn process_end_success(
    status: &mut SlaCalcStatus,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    events: &mut Vec<SlaEvent>,
) {
    record_actuals(status, start, end);
    process_duration(status, events);

    if !status.event_processed.end_processed() {
        let missed = match (status.registration().expected_end, end) {
            (Some(expected), Some(actual)) => actual > expected,
            _ => false,
        };
        if missed {
            status.event_status = Some(SlaEventStatus::EndMiss);
            status.sla_status = SlaStatus::Miss;
        } else {
            status.event_status = Some(SlaEventStatus::EndMet);
            status.sla_status = SlaStatus::Met;
        }
        status.event_processed.set(EventProcessed::END);
        events.extend(status.to_event());
    }
}

fn process_end_failure(
    status: &mut SlaCalcStatus,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    events: &mut Vec<SlaEvent>,
) {
    if start.is_none() {
        // never started: every milestone is settled as missed
        status.actual_end = end;
        if !status.event_processed.end_processed() {
            status.event_status = Some(SlaEventStatus::EndMiss);
            status.sla_status = SlaStatus::Miss;
            events.extend(status.to_event());
        }
        status.event_processed.set(EventProcessed::ALL);
        return;
    }

    record_actuals(status, start, end);
    process_duration(status, events);

    if !status.event_processed.end_processed() {
        status.event_status = Some(SlaEventStatus::EndMiss);
        status.sla_status = SlaStatus::Miss;
        status.event_processed.set(EventProcessed::END);
        events.extend(status.to_event());
    }
}

/// Settle a summary whose job reached a terminal state while the service was down
fn close_summary(
    summary: &mut SlaSummary,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    status: &str,
) {
    let previous = summary.event_processed;
    summary.event_processed = EventProcessed::CLOSED;
    summary.actual_start = start;
    summary.actual_end = end;
    summary.actual_duration_ms = duration_ms(start, end);
    if previous < EventProcessed::END {
        let met = is_success_status(status)
            && match (summary.expected_end, end) {
                (Some(expected), Some(actual)) => actual <= expected,
                _ => true,
            };
        summary.sla_status = if met { SlaStatus::Met } else { SlaStatus::Miss };
    }
}

fn mark_summary_started(summary: &mut SlaSummary, start: Option<DateTime<Utc>>) {
    summary.event_processed |= EventProcessed::START;
    if summary.sla_status == SlaStatus::NotStarted {
        summary.sla_status = SlaStatus::InProcess;
    }
    summary.actual_start = start;
}
