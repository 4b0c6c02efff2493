//! Priority command queue with delayed eligibility and key de-duplication.

use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::command::Command;

/// A command waiting in the queue
#[derive(Debug)]
pub struct QueuedCommand {
    pub command: Box<dyn Command>,
    /// Failed executions so far
    pub attempts: u32,
    key: String,
    priority: i32,
    seq: u64,
}

impl QueuedCommand {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Result of offering a command to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    Queued,
    /// A command with the same key is already waiting
    Duplicate,
    Full,
}

struct Ready(QueuedCommand);

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    /// Higher priority first, then FIFO
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

struct Delayed {
    ready_at: Instant,
    entry: QueuedCommand,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then_with(|| self.entry.seq.cmp(&other.entry.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    /// Commands waiting for their entity lock, by entity key
    parked: HashMap<String, Vec<QueuedCommand>>,
    parked_len: usize,
    keys: HashMap<String, usize>,
    seq: u64,
}

impl QueueState {
    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len() + self.parked_len
    }

    fn park(&mut self, entry: QueuedCommand) {
        self.parked
            .entry(entry.command.entity_key().to_string())
            .or_default()
            .push(entry);
        self.parked_len += 1;
    }

    fn push(&mut self, entry: QueuedCommand, delay: Duration) {
        *self.keys.entry(entry.key.clone()).or_insert(0) += 1;
        if delay.is_zero() {
            self.ready.push(Ready(entry));
        } else {
            self.delayed.push(Reverse(Delayed {
                ready_at: Instant::now() + delay,
                entry,
            }));
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|Reverse(delayed)| delayed.ready_at <= now)
        {
            if let Some(Reverse(delayed)) = self.delayed.pop() {
                self.ready.push(Ready(delayed.entry));
            }
        }
    }

    fn release_key(&mut self, key: &str) {
        if let Some(count) = self.keys.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.keys.remove(key);
            }
        }
    }
}

pub struct CommandQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    notify: Notify,
    wake: Notify,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
            notify: Notify::new(),
            wake: Notify::new(),
        }
    }

    /// Offer a new command, eligible after `delay`
    pub fn offer(&self, command: Box<dyn Command>, delay: Duration) -> QueueOutcome {
        let key = command.key();
        let priority = command.priority();
        {
            let mut state = self.state.lock();
            if state.keys.contains_key(&key) {
                return QueueOutcome::Duplicate;
            }
            if state.len() >= self.capacity {
                return QueueOutcome::Full;
            }
            state.seq += 1;
            let seq = state.seq;
            state.push(
                QueuedCommand {
                    command,
                    attempts: 0,
                    key,
                    priority,
                    seq,
                },
                delay,
            );
        }
        self.notify.notify_one();
        QueueOutcome::Queued
    }

    /// Put back a command taken from the queue, bypassing de-duplication and capacity
    pub fn requeue(&self, mut entry: QueuedCommand, delay: Duration) {
        {
            let mut state = self.state.lock();
            state.seq += 1;
            entry.seq = state.seq;
            state.push(entry, delay);
        }
        self.notify.notify_one();
    }

    /// Highest-priority eligible command, if any
    pub fn pop_ready(&self) -> Option<QueuedCommand> {
        self.pop_with(|_| Some(())).map(|(entry, ())| entry)
    }

    /// Highest-priority eligible command whose entity `acquire` can lock.
    ///
    /// A command whose entity is held is parked until [`CommandQueue::unpark`] runs for
    /// that entity. Commands for an entity with parked commands join them, so a lower
    /// priority command never overtakes a parked one.
    pub fn pop_with<G>(
        &self,
        mut acquire: impl FnMut(&str) -> Option<G>,
    ) -> Option<(QueuedCommand, G)> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        while let Some(Ready(entry)) = state.ready.pop() {
            if state.parked.contains_key(entry.command.entity_key()) {
                state.park(entry);
                continue;
            }
            match acquire(entry.command.entity_key()) {
                Some(guard) => {
                    state.release_key(&entry.key);
                    return Some((entry, guard));
                }
                None => state.park(entry),
            }
        }
        None
    }

    /// Make every command parked for `entity` eligible again, in their original order
    pub fn unpark(&self, entity: &str) {
        let released = {
            let mut state = self.state.lock();
            let Some(entries) = state.parked.remove(entity) else {
                return;
            };
            state.parked_len -= entries.len();
            let released = entries.len();
            state.ready.extend(entries.into_iter().map(Ready));
            released
        };
        for _ in 0..released {
            self.notify.notify_one();
        }
    }

    /// Wait until a command is eligible, at most `idle`.
    ///
    /// Returns early on [`CommandQueue::wake_all`].
    pub async fn wait_for_work(&self, idle: Duration) {
        let deadline = Instant::now() + idle;
        let woken = self.wake.notified();
        tokio::pin!(woken);
        woken.as_mut().enable();
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let now = Instant::now();
                let state = self.state.lock();
                if !state.ready.is_empty() {
                    return;
                }
                match state.delayed.peek() {
                    Some(Reverse(delayed)) if delayed.ready_at <= now => return,
                    Some(Reverse(delayed)) => delayed.ready_at.min(deadline),
                    None => deadline,
                }
            };
            if wake_at <= Instant::now() {
                return;
            }
            // a notification only means the queue changed, so look again
            tokio::select! {
                _ = &mut notified => {}
                _ = &mut woken => return,
                _ = tokio::time::sleep_until(wake_at) => return,
            }
        }
    }

    /// Wake every waiting worker
    pub fn wake_all(&self) {
        self.wake.notify_waiters();
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().keys.contains_key(key)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.ready.clear();
        state.delayed.clear();
        state.parked.clear();
        state.parked_len = 0;
        state.keys.clear();
    }
}
