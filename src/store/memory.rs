use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

use super::{
    Bean, BeanKind, EntityStore, StoreError, StoreResult, UpdateEntry, UpdateQuery, WriteBatch,
};
use crate::models::{
    BundleAction, BundleJob, CoordinatorAction, CoordinatorJob, SlaRegistration, SlaSummary,
    WorkflowAction, WorkflowJob,
};
use crate::state_machine::CoordinatorJobStatus;

#[derive(Debug, Default)]
struct Tables {
    workflow_jobs: HashMap<String, WorkflowJob>,
    workflow_actions: HashMap<String, WorkflowAction>,
    coordinator_jobs: HashMap<String, CoordinatorJob>,
    coordinator_actions: HashMap<String, CoordinatorAction>,
    bundle_jobs: HashMap<String, BundleJob>,
    bundle_actions: HashMap<String, BundleAction>,
    sla_registrations: HashMap<String, SlaRegistration>,
    sla_summaries: HashMap<String, SlaSummary>,
}

impl Tables {
    fn contains(&self, kind: BeanKind, id: &str) -> bool {
        match kind {
            BeanKind::WorkflowJob => self.workflow_jobs.contains_key(id),
            BeanKind::WorkflowAction => self.workflow_actions.contains_key(id),
            BeanKind::CoordinatorJob => self.coordinator_jobs.contains_key(id),
            BeanKind::CoordinatorAction => self.coordinator_actions.contains_key(id),
            BeanKind::BundleJob => self.bundle_jobs.contains_key(id),
            BeanKind::BundleAction => self.bundle_actions.contains_key(id),
            BeanKind::SlaRegistration => self.sla_registrations.contains_key(id),
            BeanKind::SlaSummary => self.sla_summaries.contains_key(id),
        }
    }

    fn get(&self, kind: BeanKind, id: &str) -> Option<Bean> {
        match kind {
            BeanKind::WorkflowJob => self.workflow_jobs.get(id).cloned().map(Bean::WorkflowJob),
            BeanKind::WorkflowAction => self.workflow_actions.get(id).cloned().map(Bean::WorkflowAction),
            BeanKind::CoordinatorJob => self.coordinator_jobs.get(id).cloned().map(Bean::CoordinatorJob),
            BeanKind::CoordinatorAction => self
                .coordinator_actions
                .get(id)
                .cloned()
                .map(Bean::CoordinatorAction),
            BeanKind::BundleJob => self.bundle_jobs.get(id).cloned().map(Bean::BundleJob),
            BeanKind::BundleAction => self.bundle_actions.get(id).cloned().map(Bean::BundleAction),
            BeanKind::SlaRegistration => self.sla_registrations.get(id).cloned().map(Bean::SlaRegistration),
            BeanKind::SlaSummary => self.sla_summaries.get(id).cloned().map(Bean::SlaSummary),
        }
    }

    fn put(&mut self, bean: Bean) {
        match bean {
            Bean::WorkflowJob(b) => {
                self.workflow_jobs.insert(b.id.clone(), b);
            }
            Bean::WorkflowAction(b) => {
                self.workflow_actions.insert(b.id.clone(), b);
            }
            Bean::CoordinatorJob(b) => {
                self.coordinator_jobs.insert(b.id.clone(), b);
            }
            Bean::CoordinatorAction(b) => {
                self.coordinator_actions.insert(b.id.clone(), b);
            }
            Bean::BundleJob(b) => {
                self.bundle_jobs.insert(b.id.clone(), b);
            }
            Bean::BundleAction(b) => {
                self.bundle_actions.insert(b.id.clone(), b);
            }
            Bean::SlaRegistration(b) => {
                self.sla_registrations.insert(b.id.clone(), b);
            }
            Bean::SlaSummary(b) => {
                self.sla_summaries.insert(b.id.clone(), b);
            }
        }
    }

    fn insert(&mut self, bean: Bean) -> StoreResult<()> {
        if self.contains(bean.kind(), bean.id()) {
            return Err(StoreError::Conflict {
                kind: bean.kind(),
                id: bean.id().to_string(),
            });
        }
        self.put(bean);
        Ok(())
    }

    fn update(&mut self, entry: UpdateEntry) -> StoreResult<()> {
        let kind = entry.bean.kind();
        let id = entry.bean.id().to_string();
        if !self.contains(kind, &id) {
            return Err(StoreError::not_found(kind, id));
        }
        if entry.query == UpdateQuery::Full {
            self.put(entry.bean);
            return Ok(());
        }

        match (entry.query, &entry.bean) {
            (UpdateQuery::WorkflowActionPendingTransition, Bean::WorkflowAction(b)) => {
                let stored = self
                    .workflow_actions
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::not_found(kind, &id))?;
                stored.pending = b.pending;
                stored.pending_age = b.pending_age;
                stored.execution_path = b.execution_path.clone();
                stored.transition = b.transition.clone();
            }
            (
                UpdateQuery::SlaSummaryStatus | UpdateQuery::SlaSummaryStatusActualTimes,
                Bean::SlaSummary(b),
            ) => {
                let stored = self
                    .sla_summaries
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::not_found(kind, &id))?;
                stored.sla_status = b.sla_status;
                stored.event_status = b.event_status;
                stored.event_processed = b.event_processed;
                stored.job_status = b.job_status.clone();
                stored.last_modified = b.last_modified;
                if entry.query == UpdateQuery::SlaSummaryStatusActualTimes {
                    stored.actual_start = b.actual_start;
                    stored.actual_end = b.actual_end;
                    stored.actual_duration_ms = b.actual_duration_ms;
                }
            }
            (query, _) => {
                return Err(StoreError::InvalidQuery {
                    query: query.to_string(),
                    kind,
                })
            }
        }
        Ok(())
    }

    fn delete(&mut self, kind: BeanKind, id: &str) -> StoreResult<()> {
        if self.remove(kind, id) {
            Ok(())
        } else {
            Err(StoreError::not_found(kind, id))
        }
    }

    fn remove(&mut self, kind: BeanKind, id: &str) -> bool {
        match kind {
            BeanKind::WorkflowJob => self.workflow_jobs.remove(id).is_some(),
            BeanKind::WorkflowAction => self.workflow_actions.remove(id).is_some(),
            BeanKind::CoordinatorJob => self.coordinator_jobs.remove(id).is_some(),
            BeanKind::CoordinatorAction => self.coordinator_actions.remove(id).is_some(),
            BeanKind::BundleJob => self.bundle_jobs.remove(id).is_some(),
            BeanKind::BundleAction => self.bundle_actions.remove(id).is_some(),
            BeanKind::SlaRegistration => self.sla_registrations.remove(id).is_some(),
            BeanKind::SlaSummary => self.sla_summaries.remove(id).is_some(),
        }
    }

    /// Apply every entry of `batch`, restoring the touched rows if one fails
    fn apply(&mut self, batch: WriteBatch) -> StoreResult<()> {
        let mut undo = Vec::with_capacity(batch.len());
        let result = self.apply_logged(batch, &mut undo);
        if result.is_err() {
            for (kind, id, previous) in undo.into_iter().rev() {
                match previous {
                    Some(bean) => self.put(bean),
                    None => {
                        self.remove(kind, &id);
                    }
                }
            }
        }
        result
    }

    /// Apply `batch`, recording each touched row's previous value in `undo` first
    fn apply_logged(
        &mut self,
        batch: WriteBatch,
        undo: &mut Vec<(BeanKind, String, Option<Bean>)>,
    ) -> StoreResult<()> {
        for bean in batch.inserts {
            let (kind, id) = (bean.kind(), bean.id().to_string());
            undo.push((kind, id.clone(), self.get(kind, &id)));
            self.insert(bean)?;
        }
        for entry in batch.updates {
            let (kind, id) = (entry.bean.kind(), entry.bean.id().to_string());
            undo.push((kind, id.clone(), self.get(kind, &id)));
            self.update(entry)?;
        }
        for delete in batch.deletes {
            undo.push((delete.kind, delete.id.clone(), self.get(delete.kind, &delete.id)));
            self.delete(delete.kind, &delete.id)?;
        }
        Ok(())
    }
}

/// Process-local [`EntityStore`].
///
/// Batches apply all or nothing: the rows a failed batch touched are restored. `fail_next_batches` and `set_unavailable` inject connectivity failures.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    failing_batches: AtomicUsize,
    batches_committed: AtomicU64,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` batch writes with `StoreError::Unavailable`
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// Fail every read and write until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn batches_committed(&self) -> u64 {
        self.batches_committed.load(Ordering::SeqCst)
    }

    pub fn count(&self, kind: BeanKind) -> usize {
        let tables = self.tables.read();
        match kind {
            BeanKind::WorkflowJob => tables.workflow_jobs.len(),
            BeanKind::WorkflowAction => tables.workflow_actions.len(),
            BeanKind::CoordinatorJob => tables.coordinator_jobs.len(),
            BeanKind::CoordinatorAction => tables.coordinator_actions.len(),
            BeanKind::BundleJob => tables.bundle_jobs.len(),
            BeanKind::BundleAction => tables.bundle_actions.len(),
            BeanKind::SlaRegistration => tables.sla_registrations.len(),
            BeanKind::SlaSummary => tables.sla_summaries.len(),
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn read<T: Clone>(
        &self,
        kind: BeanKind,
        id: &str,
        table: impl FnOnce(&Tables) -> Option<&T>,
    ) -> StoreResult<T> {
        self.check_available()?;
        let tables = self.tables.read();
        table(&tables)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, id))
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_workflow_job(&self, id: &str) -> StoreResult<WorkflowJob> {
        self.read(BeanKind::WorkflowJob, id, |t| t.workflow_jobs.get(id))
    }

    async fn get_workflow_action(&self, id: &str) -> StoreResult<WorkflowAction> {
        self.read(BeanKind::WorkflowAction, id, |t| t.workflow_actions.get(id))
    }

    async fn list_workflow_actions(&self, job_id: &str) -> StoreResult<Vec<WorkflowAction>> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut actions: Vec<WorkflowAction> = tables
            .workflow_actions
            .values()
            .filter(|action| action.job_id == job_id)
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.created_time.cmp(&b.created_time).then(a.id.cmp(&b.id)));
        Ok(actions)
    }

    async fn get_coordinator_job(&self, id: &str) -> StoreResult<CoordinatorJob> {
        self.read(BeanKind::CoordinatorJob, id, |t| t.coordinator_jobs.get(id))
    }

    async fn list_coordinator_jobs(
        &self,
        statuses: &[CoordinatorJobStatus],
    ) -> StoreResult<Vec<CoordinatorJob>> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut jobs: Vec<CoordinatorJob> = tables
            .coordinator_jobs
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    async fn get_coordinator_action(&self, id: &str) -> StoreResult<CoordinatorAction> {
        self.read(BeanKind::CoordinatorAction, id, |t| {
            t.coordinator_actions.get(id)
        })
    }

    async fn list_coordinator_actions(&self, job_id: &str) -> StoreResult<Vec<CoordinatorAction>> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut actions: Vec<CoordinatorAction> = tables
            .coordinator_actions
            .values()
            .filter(|action| action.job_id == job_id)
            .cloned()
            .collect();
        actions.sort_by_key(|action| action.action_number);
        Ok(actions)
    }

    async fn get_bundle_job(&self, id: &str) -> StoreResult<BundleJob> {
        self.read(BeanKind::BundleJob, id, |t| t.bundle_jobs.get(id))
    }

    async fn list_bundle_coordinators(&self, bundle_id: &str) -> StoreResult<Vec<BundleAction>> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut actions: Vec<BundleAction> = tables
            .bundle_actions
            .values()
            .filter(|action| action.bundle_id == bundle_id)
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.coord_name.cmp(&b.coord_name));
        Ok(actions)
    }

    async fn get_sla_registration(&self, id: &str) -> StoreResult<SlaRegistration> {
        self.read(BeanKind::SlaRegistration, id, |t| t.sla_registrations.get(id))
    }

    async fn get_sla_summary(&self, id: &str) -> StoreResult<SlaSummary> {
        self.read(BeanKind::SlaSummary, id, |t| t.sla_summaries.get(id))
    }

    async fn sla_summaries_for_restart(
        &self,
        modified_after: DateTime<Utc>,
    ) -> StoreResult<Vec<SlaSummary>> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(tables
            .sla_summaries
            .values()
            .filter(|summary| summary.event_processed <= 7 && summary.last_modified >= modified_after)
            .cloned()
            .collect())
    }

    async fn execute_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        self.check_available()?;
        let failing = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Unavailable("injected batch failure".to_string()));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let entries = batch.len();
        self.tables.write().apply(batch)?;
        self.batches_committed.fetch_add(1, Ordering::SeqCst);
        debug!(entries, "Committed write batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppType, SlaEventStatus, SlaStatus};
    use crate::store::StoreResultExt;

    fn summary(id: &str) -> SlaSummary {
        SlaSummary::from_registration(&SlaRegistration::new(id, AppType::WorkflowJob))
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = InMemoryEntityStore::new();
        let mut batch = WriteBatch::new();
        batch.insert(summary("a"));
        store.execute_batch(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.insert(summary("b"));
        batch.insert(summary("a"));
        let err = store.execute_batch(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(store.get_sla_summary("b").await.optional().unwrap().is_none());
        assert_eq!(store.count(BeanKind::SlaSummary), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_restores_updated_and_deleted_rows() {
        let store = InMemoryEntityStore::new();
        let mut batch = WriteBatch::new();
        batch.insert(summary("a")).insert(summary("b"));
        store.execute_batch(batch).await.unwrap();

        let mut changed = summary("a");
        changed.sla_status = SlaStatus::Miss;
        let mut batch = WriteBatch::new();
        batch.update(changed);
        batch.delete(BeanKind::SlaSummary, "b");
        batch.delete(BeanKind::SlaSummary, "missing");
        let err = store.execute_batch(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        assert_eq!(
            store.get_sla_summary("a").await.unwrap().sla_status,
            SlaStatus::NotStarted
        );
        assert!(store.get_sla_summary("b").await.is_ok());
        assert_eq!(store.count(BeanKind::SlaSummary), 2);
    }

    #[tokio::test]
    async fn test_partial_summary_update() {
        let store = InMemoryEntityStore::new();
        let mut batch = WriteBatch::new();
        batch.insert(summary("a"));
        store.execute_batch(batch).await.unwrap();

        let mut changed = summary("a");
        changed.sla_status = SlaStatus::Miss;
        changed.event_status = Some(SlaEventStatus::StartMiss);
        changed.event_processed = 1;
        changed.actual_start = Some(Utc::now());
        let mut batch = WriteBatch::new();
        batch.update_with(UpdateQuery::SlaSummaryStatus, changed);
        store.execute_batch(batch).await.unwrap();

        let stored = store.get_sla_summary("a").await.unwrap();
        assert_eq!(stored.sla_status, SlaStatus::Miss);
        assert_eq!(stored.event_processed, 1);
        assert!(stored.actual_start.is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryEntityStore::new();
        store.fail_next_batches(1);
        let mut batch = WriteBatch::new();
        batch.insert(summary("a"));
        assert!(matches!(
            store.execute_batch(batch.clone()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.execute_batch(batch).await.unwrap();
        assert_eq!(store.batches_committed(), 1);

        store.set_unavailable(true);
        assert!(matches!(
            store.get_sla_summary("a").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_query_filters_closed_and_stale() {
        let store = InMemoryEntityStore::new();
        let mut open = summary("open");
        open.event_processed = 3;
        let mut closed = summary("closed");
        closed.event_processed = 8;
        let mut stale = summary("stale");
        stale.last_modified = Utc::now() - chrono::Duration::days(30);

        let mut batch = WriteBatch::new();
        batch.insert(open).insert(closed).insert(stale);
        store.execute_batch(batch).await.unwrap();

        let found = store
            .sla_summaries_for_restart(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "open");
    }
}
