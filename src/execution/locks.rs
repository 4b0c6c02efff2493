//! Per-entity mutual exclusion for command execution.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct LockTable {
    held: DashMap<String, ()>,
    acquired: AtomicU64,
    contended: AtomicU64,
}

/// Registry of entity keys currently held by an executing command
#[derive(Debug, Clone, Default)]
pub struct EntityLockRegistry {
    table: Arc<LockTable>,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct EntityLockGuard {
    table: Arc<LockTable>,
    key: String,
}

impl Drop for EntityLockGuard {
    fn drop(&mut self) {
        self.table.held.remove(&self.key);
    }
}

impl EntityLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl EntityLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self, key: &str) -> Option<EntityLockGuard> {
        match self.table.held.entry(key.to_string()) {
            Entry::Occupied(_) => {
                self.table.contended.fetch_add(1, Ordering::Relaxed);
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                self.table.acquired.fetch_add(1, Ordering::Relaxed);
                Some(EntityLockGuard {
                    table: Arc::clone(&self.table),
                    key: key.to_string(),
                })
            }
        }
    }

    /// Poll for the lock every `retry_delay` until `timeout` elapses
    pub async fn acquire_with_timeout(
        &self,
        key: &str,
        timeout: Duration,
        retry_delay: Duration,
    ) -> Option<EntityLockGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_lock(key) {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(retry_delay).await;
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.table.held.contains_key(key)
    }

    pub fn held_count(&self) -> usize {
        self.table.held.len()
    }

    /// Total successful acquisitions
    pub fn acquired(&self) -> u64 {
        self.table.acquired.load(Ordering::Relaxed)
    }

    /// Total attempts that found the key already held
    pub fn contended(&self) -> u64 {
        self.table.contended.load(Ordering::Relaxed)
    }
}
