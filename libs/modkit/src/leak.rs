//! Tracks whether a stopped module's registry entry is still reachable from
//! somewhere other than the Manager's own registry.
//!
//! There is no GC finalizer to hook natively, so "still live after
//! compaction" becomes "the [`Weak`] handle still upgrades": every tracked
//! module is held as a [`Weak<ModuleRuntime>`], and a leak is a handle that
//! still upgrades well after the module transitioned out of `RUNNING` (the
//! Manager drops its own strong reference to a stopped entry only on
//! `Registry` rebuild, so an upgrade surviving the grace period means some
//! other clone of the `Arc` — a plugin closure, a cache entry — is holding
//! it alive).

use std::collections::HashMap;
use std::sync::Weak;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::module::ModuleRuntime;

struct Tracked {
    handle: Weak<ModuleRuntime>,
    stopped_at: Instant,
}

/// Registry of weak module handles used to detect modules that outlive their
/// expected lifetime after being stopped.
#[derive(Default)]
pub struct LeakTracker {
    tracked: RwLock<HashMap<String, Tracked>>,
}

impl LeakTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a module, starting the clock used by [`Self::check_for_leaks`].
    pub fn track_module(&self, name: impl Into<String>, handle: Weak<ModuleRuntime>) {
        self.tracked.write().insert(
            name.into(),
            Tracked {
                handle,
                stopped_at: Instant::now(),
            },
        );
    }

    pub fn untrack_module(&self, name: &str) {
        self.tracked.write().remove(name);
    }

    /// Whether the tracked handle for `name` still upgrades.
    #[must_use]
    pub fn is_module_in_memory(&self, name: &str) -> bool {
        self.tracked
            .read()
            .get(name)
            .is_some_and(|t| t.handle.upgrade().is_some())
    }

    #[must_use]
    pub fn tracked_modules(&self) -> Vec<String> {
        self.tracked.read().keys().cloned().collect()
    }

    /// Names of modules still upgradable `grace_period` after they were
    /// tracked (i.e. after they stopped), which is the leak signal.
    #[must_use]
    pub fn check_for_leaks(&self, grace_period: Duration) -> Vec<String> {
        let now = Instant::now();
        self.tracked
            .read()
            .iter()
            .filter(|(_, t)| now.duration_since(t.stopped_at) >= grace_period)
            .filter(|(_, t)| t.handle.upgrade().is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleCtx;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Dummy;

    #[async_trait]
    impl crate::module::Module for Dummy {
        fn meta(&self) -> crate::module::ModuleMeta {
            crate::module::ModuleMeta::new("dummy", "1.0.0")
        }
        async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn detects_still_live_handle_after_grace_period() {
        let tracker = LeakTracker::new();
        let strong = Arc::new(ModuleRuntime::new(Box::new(Dummy)));
        tracker.track_module("dummy", Arc::downgrade(&strong));

        assert!(tracker.is_module_in_memory("dummy"));
        let leaks = tracker.check_for_leaks(Duration::from_secs(0));
        assert_eq!(leaks, vec!["dummy".to_string()]);
    }

    #[test]
    fn dropped_handle_is_not_a_leak() {
        let tracker = LeakTracker::new();
        {
            let strong = Arc::new(ModuleRuntime::new(Box::new(Dummy)));
            tracker.track_module("dummy", Arc::downgrade(&strong));
        }
        assert!(!tracker.is_module_in_memory("dummy"));
        assert!(tracker.check_for_leaks(Duration::from_secs(0)).is_empty());
    }
}
