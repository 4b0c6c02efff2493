//! # Command Executor
//!
//! A fixed pool of tokio workers drains the [`CommandQueue`]. Each worker takes the
//! highest-priority eligible command, claims its entity lock (re-queuing the command
//! if another worker holds it), and runs the `load_state -> verify_precondition ->
//! execute -> commit` pipeline. Follow-up commands, events and SLA registrations are
//! released only after the command's batch has committed.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::{Command, CommandEffects};
use super::context::SystemContext;
use super::locks::{EntityLockGuard, EntityLockRegistry};
use super::outcome::CommandOutcome;
use super::queue::{CommandQueue, QueueOutcome, QueuedCommand};
use crate::error::{CommandError, ErrorCode, JobflowError, Result};

#[derive(Debug, Default)]
struct ExecutorStats {
    completed: AtomicU64,
    deferred: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    lock_contended: AtomicU64,
}

/// Point-in-time copy of executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStatsSnapshot {
    pub completed: u64,
    pub deferred: u64,
    pub failed: u64,
    pub retried: u64,
    pub lock_contended: u64,
    pub queued: u64,
}

pub struct CommandExecutor {
    ctx: SystemContext,
    queue: CommandQueue,
    locks: EntityLockRegistry,
    stats: ExecutorStats,
    /// Workers between taking a command and finishing with it
    in_flight: AtomicUsize,
    running: AtomicBool,
    shutdown_notify: Notify,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("queue", &self.queue)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl CommandExecutor {
    pub fn new(ctx: SystemContext) -> Self {
        let capacity = ctx.config.executor.queue_capacity;
        Self {
            ctx,
            queue: CommandQueue::new(capacity),
            locks: EntityLockRegistry::new(),
            stats: ExecutorStats::default(),
            in_flight: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &SystemContext {
        &self.ctx
    }

    pub fn locks(&self) -> &EntityLockRegistry {
        &self.locks
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue a command for immediate execution; `false` when the queue is full
    pub fn queue(&self, command: impl Command + 'static) -> bool {
        self.queue_boxed(Box::new(command), Duration::ZERO)
    }

    /// Queue a command that becomes eligible after `delay`
    pub fn queue_delayed(&self, command: impl Command + 'static, delay: Duration) -> bool {
        self.queue_boxed(Box::new(command), delay)
    }

    pub fn queue_boxed(&self, command: Box<dyn Command>, delay: Duration) -> bool {
        let name = command.name();
        let key = command.key();
        match self.queue.offer(command, delay) {
            QueueOutcome::Queued => {
                debug!(command = name, key = %key, delay_ms = delay.as_millis() as u64, "Queued command");
                true
            }
            QueueOutcome::Duplicate => {
                debug!(command = name, key = %key, "Command already queued, dropping duplicate");
                true
            }
            QueueOutcome::Full => {
                warn!(command = name, key = %key, error_code = %ErrorCode::E1014, "Command queue full, rejecting command");
                false
            }
        }
    }

    /// Run a command now on the caller's task, waiting for its entity lock.
    ///
    /// Goes through the same pipeline as queued commands but is never retried.
    pub async fn call(&self, mut command: impl Command) -> CommandOutcome {
        let executor = &self.ctx.config.executor;
        let Some(guard) = self
            .locks
            .acquire_with_timeout(
                command.entity_key(),
                executor.lock_timeout(),
                executor.lock_retry_delay(),
            )
            .await
        else {
            self.stats.lock_contended.fetch_add(1, Ordering::Relaxed);
            let err = CommandError::new(
                ErrorCode::E1013,
                format!("could not lock [{}]", command.entity_key()),
            );
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return CommandOutcome::Failed(err);
        };

        let outcome = self.run_pipeline(&mut command, guard).await;
        self.queue.unpark(command.entity_key());
        self.record(&command, &outcome);
        outcome
    }

    /// Spawn the worker pool
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(JobflowError::InvalidState(
                "Command executor is already running".to_string(),
            ));
        }

        let worker_count = self.ctx.config.executor.workers;
        let mut workers = self.workers.lock();
        for worker_id in 0..worker_count {
            let weak = Arc::downgrade(self);
            workers.push(tokio::spawn(Self::worker_loop(weak, worker_id)));
        }
        info!(workers = worker_count, "Started command executor");
        Ok(())
    }

    /// Stop the workers, waiting up to `timeout` for in-flight commands
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Stopping command executor");
        self.shutdown_notify.notify_waiters();
        self.queue.wake_all();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let abort_handles: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => {
                info!(pending = self.queue.len(), "Command executor stopped");
                Ok(())
            }
            Err(_) => {
                warn!("Command executor workers did not stop within timeout, aborting");
                for handle in abort_handles {
                    handle.abort();
                }
                Err(JobflowError::InvalidState(
                    "Command executor shutdown timeout exceeded".to_string(),
                ))
            }
        }
    }

    pub fn stats(&self) -> ExecutorStatsSnapshot {
        ExecutorStatsSnapshot {
            completed: self.stats.completed.load(Ordering::Relaxed),
            deferred: self.stats.deferred.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            lock_contended: self.stats.lock_contended.load(Ordering::Relaxed),
            queued: self.queue.len() as u64,
        }
    }

    /// Wait until the queue is empty and no worker holds a command, up to `timeout`
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while !self.queue.is_empty() || self.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    async fn worker_loop(executor: Weak<Self>, worker_id: usize) {
        debug!(worker_id, "Command worker started");
        loop {
            let Some(this) = executor.upgrade() else {
                break;
            };
            if !this.is_running() {
                break;
            }

            this.in_flight.fetch_add(1, Ordering::SeqCst);
            let next = this.queue.pop_with(|entity| {
                let guard = this.locks.try_lock(entity);
                if guard.is_none() {
                    this.stats.lock_contended.fetch_add(1, Ordering::Relaxed);
                }
                guard
            });
            let busy = next.is_some();
            if let Some((entry, guard)) = next {
                this.process(entry, guard).await;
            }
            this.in_flight.fetch_sub(1, Ordering::SeqCst);
            if busy {
                continue;
            }

            let idle = this.ctx.config.executor.idle_poll();
            tokio::select! {
                _ = this.queue.wait_for_work(idle) => {}
                _ = this.shutdown_notify.notified() => {
                    debug!(worker_id, "Shutdown notification received");
                    break;
                }
            }
        }
        debug!(worker_id, "Command worker stopped");
    }

    async fn process(&self, mut entry: QueuedCommand, guard: EntityLockGuard) {
        let entity = entry.command.entity_key().to_string();
        let outcome = self.run_pipeline(entry.command.as_mut(), guard).await;
        self.queue.unpark(&entity);

        if outcome.is_retryable() && entry.attempts < self.ctx.config.executor.max_retries {
            entry.attempts += 1;
            let delay = self.ctx.config.executor.retry_delay(entry.attempts);
            self.stats.retried.fetch_add(1, Ordering::Relaxed);
            warn!(
                command = entry.command.name(),
                entity = %entity,
                attempt = entry.attempts,
                delay_ms = delay.as_millis() as u64,
                error = ?outcome.error_code(),
                "Retrying command after transient failure"
            );
            self.queue.requeue(entry, delay);
            return;
        }

        self.record(entry.command.as_ref(), &outcome);
    }

    fn record(&self, command: &dyn Command, outcome: &CommandOutcome) {
        match outcome {
            CommandOutcome::Completed => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            CommandOutcome::Deferred(reason) => {
                self.stats.deferred.fetch_add(1, Ordering::Relaxed);
                crate::log_command!(
                    debug,
                    "command_deferred",
                    command: command.name(),
                    entity: command.entity_key(),
                    reason: reason,
                );
            }
            CommandOutcome::Failed(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    command = command.name(),
                    entity = %command.entity_key(),
                    code = %err.code,
                    error = %err.message,
                    "Command failed"
                );
            }
        }
    }

    async fn run_pipeline(&self, command: &mut dyn Command, guard: EntityLockGuard) -> CommandOutcome {
        let ctx = &self.ctx;
        ctx.instrumentation.command_executed(command.name());

        if let Err(err) = command.load_state(ctx).await {
            return CommandOutcome::Failed(err);
        }
        if let Some(outcome) = CommandOutcome::from_precondition(command.verify_precondition()) {
            return outcome;
        }
        let effects = match command.execute(ctx).await {
            Ok(effects) => effects,
            Err(err) => return CommandOutcome::Failed(err),
        };

        let CommandEffects {
            batch,
            follow_ups,
            events,
            sla_registrations,
            sla_updates,
            counters,
        } = effects;

        if !batch.is_empty() {
            if let Err(err) = ctx.store.execute_batch(batch).await {
                return CommandOutcome::Failed(err.into());
            }
        }
        drop(guard);

        for counter in counters {
            ctx.instrumentation.incr(counter);
        }
        if let Some(sla) = &ctx.sla {
            for registration in sla_registrations {
                sla.add_registration_event(registration).await;
            }
            for registration in sla_updates {
                sla.update_registration_event(registration).await;
            }
        }
        for event in events {
            ctx.events.queue_event(event);
        }
        for follow_up in follow_ups {
            self.queue_boxed(follow_up.command, follow_up.delay);
        }

        crate::log_command!(
            debug,
            "command_completed",
            command: command.name(),
            entity: command.entity_key(),
        );
        CommandOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::execution::Precondition;
    use crate::models::{JobConf, WorkflowJob};
    use crate::instance::WorkflowApp;
    use crate::store::{EntityStore, InMemoryEntityStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.executor.workers = 4;
        config.executor.retry_initial_delay_ms = 1;
        config.executor.retry_max_delay_ms = 5;
        config.executor.lock_retry_delay_ms = 1;
        config.executor.idle_poll_ms = 5;
        config
    }

    fn executor(store: Arc<InMemoryEntityStore>) -> Arc<CommandExecutor> {
        Arc::new(CommandExecutor::new(SystemContext::new(store, config())))
    }

    fn job(id: &str) -> WorkflowJob {
        let app = WorkflowApp::builder("app")
            .action("a", "noop", "end", "fail")
            .end("end")
            .kill("fail", "failed")
            .build()
            .unwrap();
        WorkflowJob::new(id, app, JobConf::new(), "alice")
    }

    /// Tracks how many instances run `execute` at once
    #[derive(Debug)]
    struct Overlap {
        entity: String,
        seq: usize,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Command for Overlap {
        fn name(&self) -> &'static str {
            "overlap"
        }
        fn entity_key(&self) -> &str {
            &self.entity
        }
        fn key(&self) -> String {
            format!("overlap_{}_{}", self.entity, self.seq)
        }
        async fn load_state(&mut self, _ctx: &SystemContext) -> std::result::Result<(), CommandError> {
            Ok(())
        }
        fn verify_precondition(&self) -> Precondition {
            Precondition::Ready
        }
        async fn execute(
            &mut self,
            _ctx: &SystemContext,
        ) -> std::result::Result<CommandEffects, CommandError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(CommandEffects::new())
        }
    }

    /// Inserts a job and queues a child command once committed
    #[derive(Debug)]
    struct InsertJob {
        id: String,
        deferred: bool,
        follow_up: bool,
    }

    #[async_trait]
    impl Command for InsertJob {
        fn name(&self) -> &'static str {
            "insert_job"
        }
        fn entity_key(&self) -> &str {
            &self.id
        }
        async fn load_state(&mut self, _ctx: &SystemContext) -> std::result::Result<(), CommandError> {
            Ok(())
        }
        fn verify_precondition(&self) -> Precondition {
            if self.deferred {
                Precondition::deferred("not yet")
            } else {
                Precondition::Ready
            }
        }
        async fn execute(
            &mut self,
            _ctx: &SystemContext,
        ) -> std::result::Result<CommandEffects, CommandError> {
            let mut effects = CommandEffects::new();
            effects.insert(job(&self.id));
            if self.follow_up {
                effects.queue(InsertJob {
                    id: format!("{}-child", self.id),
                    deferred: false,
                    follow_up: false,
                });
            }
            Ok(effects)
        }
    }

    #[tokio::test]
    async fn test_same_entity_never_overlaps() {
        let store = Arc::new(InMemoryEntityStore::new());
        let executor = executor(store);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        for seq in 0..20 {
            assert!(executor.queue(Overlap {
                entity: "wf-1".to_string(),
                seq,
                active: active.clone(),
                max_active: max_active.clone(),
            }));
        }
        executor.start().unwrap();
        assert!(executor.drain(Duration::from_secs(5)).await);

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(executor.stats().completed, 20);
        assert!(executor.locks().acquired() >= 20);
        executor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    /// Records its label when it starts executing
    #[derive(Debug)]
    struct Recorder {
        label: &'static str,
        priority: i32,
        hold: Duration,
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Command for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn entity_key(&self) -> &str {
            "wf-1"
        }
        fn key(&self) -> String {
            format!("recorder_{}", self.label)
        }
        async fn load_state(&mut self, _ctx: &SystemContext) -> std::result::Result<(), CommandError> {
            Ok(())
        }
        fn verify_precondition(&self) -> Precondition {
            Precondition::Ready
        }
        async fn execute(
            &mut self,
            _ctx: &SystemContext,
        ) -> std::result::Result<CommandEffects, CommandError> {
            self.log.lock().push(self.label);
            tokio::time::sleep(self.hold).await;
            Ok(CommandEffects::new())
        }
    }

    #[tokio::test]
    async fn test_waiting_commands_keep_priority_for_busy_entity() {
        let executor = executor(Arc::new(InMemoryEntityStore::new()));
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = |label, priority, hold_ms| Recorder {
            label,
            priority,
            hold: Duration::from_millis(hold_ms),
            log: log.clone(),
        };
        executor.start().unwrap();

        executor.queue(recorder("running", 0, 100));
        tokio::time::timeout(Duration::from_secs(5), async {
            while log.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        executor.queue(recorder("low", 0, 0));
        executor.queue(recorder("high", 10, 0));
        assert!(executor.drain(Duration::from_secs(5)).await);

        assert_eq!(*log.lock(), vec!["running", "high", "low"]);
        assert!(executor.stats().lock_contended >= 1);
        executor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_follow_ups_run_after_commit() {
        let store = Arc::new(InMemoryEntityStore::new());
        let executor = executor(store.clone());
        executor.start().unwrap();

        executor.queue(InsertJob {
            id: "wf-1".to_string(),
            deferred: false,
            follow_up: true,
        });
        assert!(executor.drain(Duration::from_secs(5)).await);

        assert!(store.get_workflow_job("wf-1").await.is_ok());
        assert!(store.get_workflow_job("wf-1-child").await.is_ok());
        assert_eq!(executor.stats().completed, 2);
        assert_eq!(
            executor.context().instrumentation.get("command.insert_job.executed"),
            2
        );
        executor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_failure_drops_follow_ups_then_retries() {
        let store = Arc::new(InMemoryEntityStore::new());
        store.fail_next_batches(1);
        let executor = executor(store.clone());

        let outcome = executor
            .call(InsertJob {
                id: "wf-1".to_string(),
                deferred: false,
                follow_up: true,
            })
            .await;
        assert!(outcome.is_retryable());
        assert_eq!(executor.queue_len(), 0);

        store.fail_next_batches(1);
        executor.start().unwrap();
        executor.queue(InsertJob {
            id: "wf-2".to_string(),
            deferred: false,
            follow_up: true,
        });
        assert!(executor.drain(Duration::from_secs(5)).await);

        let stats = executor.stats();
        assert_eq!(stats.retried, 1);
        assert!(store.get_workflow_job("wf-2").await.is_ok());
        assert!(store.get_workflow_job("wf-2-child").await.is_ok());
        executor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = Arc::new(InMemoryEntityStore::new());
        store.fail_next_batches(100);
        let executor = executor(store);
        executor.start().unwrap();

        executor.queue(InsertJob {
            id: "wf-1".to_string(),
            deferred: false,
            follow_up: false,
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while executor.stats().failed == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stats = executor.stats();
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.failed, 1);
        executor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deferred_command_is_dropped_without_writes() {
        let store = Arc::new(InMemoryEntityStore::new());
        let executor = executor(store.clone());

        let outcome = executor
            .call(InsertJob {
                id: "wf-1".to_string(),
                deferred: true,
                follow_up: true,
            })
            .await;
        assert_eq!(outcome, CommandOutcome::Deferred("not yet".to_string()));
        assert_eq!(store.batches_committed(), 0);
        assert_eq!(executor.stats().deferred, 1);
        assert_eq!(executor.stats().retried, 0);
    }

    #[tokio::test]
    async fn test_call_times_out_on_held_lock() {
        let store = Arc::new(InMemoryEntityStore::new());
        let mut config = config();
        config.executor.lock_timeout_ms = 20;
        let executor = CommandExecutor::new(SystemContext::new(store, config));
        let _held = executor.locks().try_lock("wf-1").unwrap();

        let outcome = executor
            .call(InsertJob {
                id: "wf-1".to_string(),
                deferred: false,
                follow_up: false,
            })
            .await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::E1013));
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let executor = executor(Arc::new(InMemoryEntityStore::new()));
        executor.start().unwrap();
        assert!(executor.start().is_err());
        executor.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(!executor.is_running());
    }
}
