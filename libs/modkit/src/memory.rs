//! Periodic heap sampling and growth-rate leak detection.
//!
//! *Native re-grounding.* There is no manual heap-compaction entry point or
//! GC finalizer available natively: "request compaction" becomes
//! [`MemoryInspector::try_compact`], a no-op hook that always reports no
//! compaction facility was available, and "finalization callback" becomes
//! explicit removal from the snapshot map via [`MemoryInspector::forget_module`]
//! when a module is unregistered, since there is no weak-pointer death
//! notification to rely on. Per-process heap counters come from `sysinfo`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// One heap-usage sample for a module.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub timestamp: Instant,
    pub heap_used_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakProbability {
    None,
    Low,
    Medium,
    High,
}

/// One growth-rate finding from [`MemoryInspector::analyze_memory_usage`].
#[derive(Debug, Clone)]
pub struct LeakFinding {
    pub module: String,
    pub severity: Severity,
    pub growth_rate_mb_per_hour: f64,
    pub recommendation: String,
}

/// Per-module row of [`MemoryReport`].
#[derive(Debug, Clone)]
pub struct ModuleMemoryReport {
    pub module: String,
    pub heap_growth_mb: f64,
    pub growth_rate_mb_per_hour: f64,
    pub leak_probability: LeakProbability,
}

#[derive(Debug, Clone)]
pub struct MemoryReport {
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub modules: Vec<ModuleMemoryReport>,
}

/// MB/h boundaries used to classify growth rate into a severity.
#[derive(Debug, Clone, Copy)]
pub struct GrowthThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for GrowthThresholds {
    fn default() -> Self {
        Self {
            low: 5.0,
            medium: 20.0,
            high: 50.0,
        }
    }
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn classify(rate: f64, thresholds: GrowthThresholds) -> Option<Severity> {
    if rate >= thresholds.high {
        Some(Severity::High)
    } else if rate >= thresholds.medium {
        Some(Severity::Medium)
    } else if rate >= thresholds.low {
        Some(Severity::Low)
    } else {
        None
    }
}

fn recommendation_for(module: &str, severity: Severity) -> String {
    match severity {
        Severity::Low => format!("monitor '{module}' for continued heap growth"),
        Severity::Medium => format!("investigate possible memory retention in '{module}'"),
        Severity::High => format!("'{module}' may be leaking memory; investigate immediately"),
    }
}

/// Periodic sampler: pushes a [`Snapshot`] for every non-disabled module on
/// each tick, bounded per-module by `max_snapshots`.
pub struct MemoryInspector {
    rings: RwLock<HashMap<String, VecDeque<Snapshot>>>,
    max_snapshots: usize,
    thresholds: GrowthThresholds,
    system: Mutex<sysinfo::System>,
    cancel: CancellationToken,
}

impl MemoryInspector {
    #[must_use]
    pub fn new(max_snapshots: usize, thresholds: GrowthThresholds, cancel: CancellationToken) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            max_snapshots,
            thresholds,
            system: Mutex::new(sysinfo::System::new()),
            cancel,
        }
    }

    /// Always reports no compaction facility was available: there is no
    /// manual heap-compaction entry point in this runtime.
    #[must_use]
    pub fn try_compact() -> bool {
        false
    }

    fn current_heap_used_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let pid = sysinfo::get_current_pid().ok();
        pid.and_then(|pid| system.process(pid))
            .map(sysinfo::Process::memory)
            .unwrap_or_else(|| system.used_memory())
    }

    /// Pushes one snapshot for every name in `module_names`, dropping the
    /// oldest sample once a ring exceeds `max_snapshots`.
    pub fn take_snapshot(&self, module_names: &[&str]) {
        Self::try_compact();
        let heap_used_bytes = self.current_heap_used_bytes();
        let timestamp = Instant::now();
        let mut rings = self.rings.write();
        for name in module_names {
            let ring = rings.entry((*name).to_string()).or_default();
            ring.push_back(Snapshot {
                timestamp,
                heap_used_bytes,
            });
            while ring.len() > self.max_snapshots {
                ring.pop_front();
            }
        }
    }

    /// Drops a module's ring; the native stand-in for a finalization
    /// callback firing on module collection.
    pub fn forget_module(&self, name: &str) {
        self.rings.write().remove(name);
    }

    #[must_use]
    pub fn ring_len(&self, name: &str) -> usize {
        self.rings.read().get(name).map_or(0, VecDeque::len)
    }

    /// For every module with at least two snapshots spanning >= 0.01h,
    /// computes the growth rate and classifies it; rates below `thresholds.low`
    /// produce no finding.
    #[must_use]
    pub fn analyze_memory_usage(&self) -> Vec<LeakFinding> {
        let rings = self.rings.read();
        let mut findings = Vec::new();
        for (module, ring) in rings.iter() {
            if ring.len() < 2 {
                continue;
            }
            let oldest = ring.front().unwrap();
            let newest = ring.back().unwrap();
            let hours = newest.timestamp.duration_since(oldest.timestamp).as_secs_f64() / 3600.0;
            if hours < 0.01 {
                continue;
            }
            let heap_growth_mb =
                (newest.heap_used_bytes as f64 - oldest.heap_used_bytes as f64) / BYTES_PER_MB;
            let growth_rate = heap_growth_mb / hours;
            if let Some(severity) = classify(growth_rate, self.thresholds) {
                findings.push(LeakFinding {
                    module: module.clone(),
                    severity,
                    growth_rate_mb_per_hour: growth_rate,
                    recommendation: recommendation_for(module, severity),
                });
            }
        }
        findings
    }

    #[must_use]
    pub fn generate_memory_report(&self) -> MemoryReport {
        let mut system = self.system.lock();
        system.refresh_memory();
        let heap_used_bytes = system.used_memory();
        let heap_total_bytes = system.total_memory();
        drop(system);

        let rings = self.rings.read();
        let mut modules: Vec<ModuleMemoryReport> = rings
            .iter()
            .filter(|(_, ring)| ring.len() >= 2)
            .map(|(module, ring)| {
                let oldest = ring.front().unwrap();
                let newest = ring.back().unwrap();
                let hours = newest.timestamp.duration_since(oldest.timestamp).as_secs_f64() / 3600.0;
                let heap_growth_mb =
                    (newest.heap_used_bytes as f64 - oldest.heap_used_bytes as f64) / BYTES_PER_MB;
                let growth_rate_mb_per_hour = if hours < 0.01 { 0.0 } else { heap_growth_mb / hours };
                let leak_probability = match classify(growth_rate_mb_per_hour, self.thresholds) {
                    Some(Severity::Low) => LeakProbability::Low,
                    Some(Severity::Medium) => LeakProbability::Medium,
                    Some(Severity::High) => LeakProbability::High,
                    None => LeakProbability::None,
                };
                ModuleMemoryReport {
                    module: module.clone(),
                    heap_growth_mb,
                    growth_rate_mb_per_hour,
                    leak_probability,
                }
            })
            .collect();

        modules.sort_by(|a, b| {
            b.growth_rate_mb_per_hour
                .partial_cmp(&a.growth_rate_mb_per_hour)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        MemoryReport {
            heap_used_bytes,
            heap_total_bytes,
            modules,
        }
    }

    /// Spawns the periodic sampling task on the current `tokio` runtime.
    /// Every tick takes a snapshot, runs [`Self::analyze_memory_usage`], and
    /// hands any non-empty findings to `on_findings` (the Manager's
    /// `memoryLeaks` broadcast). Stops when `self`'s cancellation token
    /// fires or is cancelled directly via [`Self::stop`].
    pub fn start(
        self: Arc<Self>,
        interval: Duration,
        initial_delay: Duration,
        module_names: Vec<&'static str>,
        mut on_findings: impl FnMut(Vec<LeakFinding>) + Send + 'static,
    ) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(initial_delay) => {}
                () = cancel.cancelled() => return,
            }
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.take_snapshot(&module_names);
                        let findings = self.analyze_memory_usage();
                        if !findings.is_empty() {
                            on_findings(findings);
                        }
                    }
                    () = cancel.cancelled() => return,
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_at(hours_ago: f64, heap_used_bytes: u64) -> Snapshot {
        Snapshot {
            timestamp: Instant::now() - Duration::from_secs_f64(hours_ago * 3600.0),
            heap_used_bytes,
        }
    }

    #[test]
    fn ring_is_bounded_by_max_snapshots() {
        let inspector = MemoryInspector::new(2, GrowthThresholds::default(), CancellationToken::new());
        inspector.take_snapshot(&["m"]);
        inspector.take_snapshot(&["m"]);
        inspector.take_snapshot(&["m"]);
        assert_eq!(inspector.ring_len("m"), 2);
    }

    #[test]
    fn classifies_medium_growth_rate_per_scenario() {
        // two snapshots one hour apart, 25 MB growth -> medium per {low:5, medium:20, high:50}.
        let thresholds = GrowthThresholds::default();
        let oldest = snapshot_at(1.0, 100 * 1024 * 1024);
        let newest = snapshot_at(0.0, 125 * 1024 * 1024);
        let mut ring = VecDeque::new();
        ring.push_back(oldest);
        ring.push_back(newest);

        let inspector = MemoryInspector::new(12, thresholds, CancellationToken::new());
        inspector.rings.write().insert("X".to_string(), ring);

        let findings = inspector.analyze_memory_usage();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert!((findings[0].growth_rate_mb_per_hour - 25.0).abs() < 0.5);
    }

    #[test]
    fn ignores_growth_below_low_threshold() {
        let thresholds = GrowthThresholds::default();
        let mut ring = VecDeque::new();
        ring.push_back(snapshot_at(1.0, 100 * 1024 * 1024));
        ring.push_back(snapshot_at(0.0, 101 * 1024 * 1024));

        let inspector = MemoryInspector::new(12, thresholds, CancellationToken::new());
        inspector.rings.write().insert("X".to_string(), ring);

        assert!(inspector.analyze_memory_usage().is_empty());
    }

    #[test]
    fn try_compact_always_reports_unavailable() {
        assert!(!MemoryInspector::try_compact());
    }
}
