use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Named monotonic counters bumped by commands and the executor
#[derive(Debug, Default)]
pub struct Instrumentation {
    counters: DashMap<String, AtomicU64>,
}

impl Instrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &str, delta: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Count one run of a command by name
    pub fn command_executed(&self, command: &str) {
        self.incr(&format!("command.{command}.executed"));
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}
