//! In-process counters for cache activity and compile timing.
//!
//! Events are aggregated in a global table keyed by name and mirrored as
//! `tracing` events. The table is cheap to snapshot.

use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfilerKey {
    Cache(&'static str),
    Compile(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    pub calls: u64,
    pub total: Duration,
}

fn table() -> &'static Mutex<BTreeMap<ProfilerKey, EventStats>> {
    static TABLE: OnceLock<Mutex<BTreeMap<ProfilerKey, EventStats>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(BTreeMap::new()))
}

fn record(key: ProfilerKey, elapsed: Duration) {
    let mut stats = table().lock().expect("profiler mutex poisoned");
    let entry = stats.entry(key).or_default();
    entry.calls = entry.calls.saturating_add(1);
    entry.total = entry.total.saturating_add(elapsed);
}

/// Counts one occurrence of a named cache event.
pub fn cache_event(name: &'static str) {
    tracing::trace!(event = name, "cache event");
    record(ProfilerKey::Cache(name), Duration::ZERO);
}

/// Times a compile step until the returned guard is dropped.
pub fn compile_scope(name: &'static str) -> ScopeGuard {
    ScopeGuard {
        key: ProfilerKey::Compile(name),
        start: Instant::now(),
    }
}

pub struct ScopeGuard {
    key: ProfilerKey,
    start: Instant,
}

impl ScopeGuard {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if let ProfilerKey::Compile(name) = self.key {
            tracing::debug!(scope = name, elapsed_ms = elapsed.as_secs_f64() * 1e3, "compile scope");
        }
        record(self.key, elapsed);
    }
}

pub fn snapshot() -> BTreeMap<ProfilerKey, EventStats> {
    table().lock().expect("profiler mutex poisoned").clone()
}

/// Number of times the cache event `name` was recorded.
pub fn cache_count(name: &'static str) -> u64 {
    table()
        .lock()
        .expect("profiler mutex poisoned")
        .get(&ProfilerKey::Cache(name))
        .map(|stats| stats.calls)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_scope_records_on_drop() {
        {
            let _scope = compile_scope("profiling_test_scope");
        }
        let stats = snapshot();
        let entry = stats
            .get(&ProfilerKey::Compile("profiling_test_scope"))
            .copied()
            .unwrap_or_default();
        assert!(entry.calls >= 1);
    }

    #[test]
    fn cache_events_accumulate() {
        let before = cache_count("profiling_test_event");
        cache_event("profiling_test_event");
        cache_event("profiling_test_event");
        assert!(cache_count("profiling_test_event") >= before + 2);
    }
}
