//! Plugin hook protocol and the exporter fan-out.
//!
//! A plugin is a fixed record of optional callbacks keyed by phase name,
//! not a dynamic patch of the `Module` base: every load/initialize/start/stop
//! phase is an explicit [`HookPoint`] a registered plugin can observe, in
//! registration order, without replacing anything on `Module` itself.

use std::sync::Arc;

use async_trait::async_trait;

use crate::module::ModuleState;

/// One named point in the module lifecycle a plugin may observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeModuleLoad,
    AfterModuleLoad,
    BeforeModuleInitialize,
    AfterModuleInitialize,
    BeforeModuleStart,
    AfterModuleStart,
    BeforeModuleStop,
    AfterModuleStop,
    OnError,
}

/// Context passed to every hook invocation.
pub struct HookContext<'a> {
    pub module: &'a str,
    pub state: ModuleState,
    pub error: Option<&'a anyhow::Error>,
}

/// A plugin implements any subset of the nine hook points; unimplemented
/// ones default to a no-op.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once, synchronously, right after `registerPlugin(p)`.
    async fn initialize(&self, _manager: &crate::manager::Manager) {}

    async fn on_hook(&self, _point: HookPoint, _ctx: &HookContext<'_>) {}
}

/// Ordered plugin sequence; every hook runs on every plugin in registration
/// order. A plugin's hook failing is advisory — logged, never fatal, and
/// never blocks the remaining plugins or the phase for the current module.
#[derive(Default)]
pub struct PluginChain {
    plugins: parking_lot::RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.write().push(plugin);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Invokes `point` on every registered plugin in order, awaiting each to
    /// completion before moving to the next (and, by the caller's contract,
    /// before the Manager proceeds to the next module for this phase).
    pub async fn dispatch(&self, point: HookPoint, ctx: &HookContext<'_>) {
        let plugins = self.plugins.read().clone();
        for plugin in plugins {
            plugin.on_hook(point, ctx).await;
        }
    }
}

/// A sink for the periodic `{modules, health, memory, timestamp}` snapshot
/// produced by `Manager::export_metrics`.
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    async fn export(&self, payload: &serde_json::Value);
}

#[derive(Default)]
pub struct ExporterChain {
    exporters: parking_lot::RwLock<Vec<Arc<dyn MetricsExporter>>>,
}

impl ExporterChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, exporter: Arc<dyn MetricsExporter>) {
        self.exporters.write().push(exporter);
    }

    /// Fans `payload` out to every registered exporter concurrently.
    pub async fn export_all(&self, payload: &serde_json::Value) {
        let exporters = self.exporters.read().clone();
        let futures = exporters.iter().map(|e| e.export(payload));
        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Plugin for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        async fn on_hook(&self, _point: HookPoint, _ctx: &HookContext<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatches_to_every_registered_plugin() {
        let chain = PluginChain::new();
        let count = Arc::new(AtomicUsize::new(0));
        chain.register(Arc::new(Counter(count.clone())));
        chain.register(Arc::new(Counter(count.clone())));

        let ctx = HookContext {
            module: "m",
            state: ModuleState::Running,
            error: None,
        };
        chain.dispatch(HookPoint::AfterModuleStart, &ctx).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
