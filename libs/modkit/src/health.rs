//! Per-operation timing and failure counters, keyed by `(module, operation)`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::module::ModuleState;
use crate::telemetry::ThrottledLog;

type OpKey = (String, String);

const SLOW_WARN_THRESHOLD: Duration = Duration::from_secs(5);
const SLOW_DEBUG_THRESHOLD: Duration = Duration::from_secs(1);
const THROTTLE_WINDOW: Duration = Duration::from_secs(30);

/// Aggregated counters for one `(module, operation)` pair.
#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    pub count: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub error_count: u64,
    pub last_error_time: Option<Instant>,
    pub last_state: Option<ModuleState>,
}

impl OperationMetrics {
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / u32::try_from(self.count).unwrap_or(u32::MAX)
        }
    }
}

/// System-wide rollup produced by [`HealthTracker::system_health`].
#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub total_operations: u64,
    pub total_failures: u64,
    pub total_errors: u64,
    pub average_init_duration: Duration,
    pub slow_modules: Vec<String>,
}

/// Records operation timings and error counters and throttles the
/// slow-operation warning per `(module, operation)` key.
#[derive(Default)]
pub struct HealthTracker {
    pending: DashMap<OpKey, Instant>,
    metrics: DashMap<OpKey, OperationMetrics>,
    throttle_warn: DashMap<OpKey, ThrottledLog>,
    throttle_debug: DashMap<OpKey, ThrottledLog>,
}

impl HealthTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_start(&self, module: &str, op: &str) {
        self.pending.insert((module.to_string(), op.to_string()), Instant::now());
    }

    /// Computes the duration since the matching `track_start`, updates the
    /// aggregates, and throttle-logs a warning/debug line if the operation
    /// ran long.
    pub fn track_end(&self, module: &str, op: &str, success: bool, state: ModuleState) {
        let key = (module.to_string(), op.to_string());
        let Some((_, started)) = self.pending.remove(&key) else {
            return;
        };
        let duration = started.elapsed();

        {
            let mut entry = self.metrics.entry(key.clone()).or_default();
            entry.count += 1;
            if !success {
                entry.failures += 1;
            }
            entry.total_duration += duration;
            entry.last_state = Some(state);
        }

        if duration >= SLOW_WARN_THRESHOLD {
            let throttle = self
                .throttle_warn
                .entry(key.clone())
                .or_insert_with(|| ThrottledLog::new(THROTTLE_WINDOW));
            if throttle.should_log() {
                tracing::warn!(module, op, duration_ms = duration.as_millis() as u64, "operation exceeded 5s");
            }
        } else if duration >= SLOW_DEBUG_THRESHOLD {
            let throttle = self
                .throttle_debug
                .entry(key)
                .or_insert_with(|| ThrottledLog::new(THROTTLE_WINDOW));
            if throttle.should_log() {
                tracing::debug!(module, op, duration_ms = duration.as_millis() as u64, "operation exceeded 1s");
            }
        }
    }

    pub fn track_error(&self, module: &str, op: &str) {
        let key = (module.to_string(), op.to_string());
        let mut entry = self.metrics.entry(key).or_default();
        entry.error_count += 1;
        entry.last_error_time = Some(Instant::now());
    }

    #[must_use]
    pub fn metrics(&self) -> HashMap<OpKey, OperationMetrics> {
        self.metrics.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    #[must_use]
    pub fn module_metrics(&self, module: &str) -> HashMap<String, OperationMetrics> {
        self.metrics
            .iter()
            .filter(|e| e.key().0 == module)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect()
    }

    /// Modules with a completed `"initialization"` op, sorted by average
    /// duration descending, truncated to `limit`.
    #[must_use]
    pub fn slowest_modules(&self, limit: usize) -> Vec<(String, Duration)> {
        let mut rows: Vec<(String, Duration)> = self
            .metrics
            .iter()
            .filter(|e| e.key().1 == "initialization" && e.value().count > 0)
            .map(|e| (e.key().0.clone(), e.value().average_duration()))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(limit);
        rows
    }

    #[must_use]
    pub fn most_error_prone_modules(&self, limit: usize) -> Vec<(String, u64)> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        for entry in &self.metrics {
            *totals.entry(entry.key().0.clone()).or_insert(0) += entry.value().error_count;
        }
        let mut rows: Vec<(String, u64)> = totals.into_iter().filter(|(_, c)| *c > 0).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(limit);
        rows
    }

    #[must_use]
    pub fn system_health(&self) -> SystemHealth {
        let mut total_operations = 0u64;
        let mut total_failures = 0u64;
        let mut total_errors = 0u64;
        let mut init_total = Duration::ZERO;
        let mut init_count = 0u64;
        let mut init_by_module: HashMap<String, Duration> = HashMap::new();

        for entry in &self.metrics {
            let m = entry.value();
            total_operations += m.count;
            total_failures += m.failures;
            total_errors += m.error_count;
            if entry.key().1 == "initialization" && m.count > 0 {
                init_total += m.total_duration;
                init_count += m.count;
                init_by_module.insert(entry.key().0.clone(), m.average_duration());
            }
        }

        let average_init_duration = if init_count == 0 {
            Duration::ZERO
        } else {
            init_total / u32::try_from(init_count).unwrap_or(u32::MAX)
        };

        let slow_modules = init_by_module
            .into_iter()
            .filter(|(_, avg)| *avg > average_init_duration.saturating_mul(2))
            .map(|(name, _)| name)
            .collect();

        SystemHealth {
            total_operations,
            total_failures,
            total_errors,
            average_init_duration,
            slow_modules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_count_and_failures() {
        let tracker = HealthTracker::new();
        tracker.track_start("m", "initialization");
        tracker.track_end("m", "initialization", true, ModuleState::Initialized);
        tracker.track_start("m", "initialization");
        tracker.track_end("m", "initialization", false, ModuleState::Error);

        let metrics = tracker.module_metrics("m");
        let init = &metrics["initialization"];
        assert_eq!(init.count, 2);
        assert_eq!(init.failures, 1);
    }

    #[test]
    fn track_error_increments_error_count() {
        let tracker = HealthTracker::new();
        tracker.track_error("m", "start");
        tracker.track_error("m", "start");
        let metrics = tracker.module_metrics("m");
        assert_eq!(metrics["start"].error_count, 2);
    }

    #[test]
    fn slowest_modules_filters_and_sorts_by_average() {
        let tracker = HealthTracker::new();
        tracker.track_start("fast", "initialization");
        tracker.track_end("fast", "initialization", true, ModuleState::Initialized);
        tracker.track_start("other", "start");
        tracker.track_end("other", "start", true, ModuleState::Running);

        let slowest = tracker.slowest_modules(10);
        assert_eq!(slowest.len(), 1);
        assert_eq!(slowest[0].0, "fast");
    }

    #[test]
    fn most_error_prone_modules_excludes_zero_error_modules() {
        let tracker = HealthTracker::new();
        tracker.track_error("noisy", "start");
        tracker.track_start("quiet", "start");
        tracker.track_end("quiet", "start", true, ModuleState::Running);

        let prone = tracker.most_error_prone_modules(10);
        assert_eq!(prone, vec![("noisy".to_string(), 1)]);
    }
}
