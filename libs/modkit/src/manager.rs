//! The scheduler and registry: the orchestrator that drives every module
//! through discovery, dependency ordering, and the lifecycle passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::ResolvedOptions;
use crate::config_store::ConfigStore;
use crate::context::ModuleCtx;
use crate::error::ManagerError;
use crate::events::{ManagerEvent, ModuleError as ModuleErrorEvent, ModuleStatus, Operation, StateChange};
use crate::health::HealthTracker;
use crate::leak::LeakTracker;
use crate::memory::{GrowthThresholds, MemoryInspector};
use crate::module::{LifecycleOutcome, ModuleRuntime, ModuleState};
use crate::plugin::{ExporterChain, HookContext, HookPoint, MetricsExporter, Plugin, PluginChain};
use crate::recovery::RecoverySupervisor;
use crate::registry::{LoadTally, Registry};

/// The dependency-order lifecycle engine. Owns every module exclusively;
/// everything else (plugins, the memory inspector, a `ModuleCtx`) holds only
/// a non-owning reference to it.
pub struct Manager {
    registry: RwLock<Registry>,
    self_ref: OnceLock<Weak<Manager>>,
    config_store: ConfigStore,
    health: HealthTracker,
    memory_inspector: Arc<MemoryInspector>,
    leak_tracker: LeakTracker,
    recovery: RecoverySupervisor,
    plugins: PluginChain,
    exporters: ExporterChain,
    cache: DashMap<String, (Instant, serde_json::Value)>,
    options: ResolvedOptions,
    initialized: AtomicBool,
    cancel: CancellationToken,
    events_tx: tokio::sync::broadcast::Sender<ManagerEvent>,
}

impl Manager {
    #[must_use]
    pub fn new(options: ResolvedOptions) -> Arc<Self> {
        let (events_tx, _rx) = tokio::sync::broadcast::channel(256);
        let cancel = CancellationToken::new();
        let memory_inspector = Arc::new(MemoryInspector::new(
            12,
            GrowthThresholds::default(),
            cancel.child_token(),
        ));
        let config_store = ConfigStore::new(options.config_path.clone());
        let recovery = RecoverySupervisor::new(options.recovery_max_attempts, options.recovery_delay);

        let manager = Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            self_ref: OnceLock::new(),
            config_store,
            health: HealthTracker::new(),
            memory_inspector,
            leak_tracker: LeakTracker::new(),
            recovery,
            plugins: PluginChain::new(),
            exporters: ExporterChain::new(),
            cache: DashMap::new(),
            options,
            initialized: AtomicBool::new(false),
            cancel,
            events_tx,
        });
        let _ = manager.self_ref.set(Arc::downgrade(&manager));
        manager
    }

    fn weak_self(&self) -> Weak<Manager> {
        self.self_ref.get().cloned().unwrap_or_default()
    }

    fn ctx_for(&self, module_name: &'static str) -> ModuleCtx {
        let config = self.config_store.get_config(module_name).unwrap_or_else(|| serde_json::json!({}));
        ModuleCtx::new(module_name, self.weak_self(), config)
    }

    #[must_use]
    pub fn find_module(&self, name: &str) -> Option<Arc<ModuleRuntime>> {
        self.registry.read().find(name).cloned()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ManagerEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Emits `StateChanged` for the transition a lifecycle call actually
    /// made; a `Refused` outcome flipped nothing, so it emits nothing.
    fn note_transition(&self, module: &str, outcome: &LifecycleOutcome, new: ModuleState) {
        match outcome {
            LifecycleOutcome::Success { previous } | LifecycleOutcome::Failed { previous, .. } => {
                self.emit(ManagerEvent::StateChanged(StateChange {
                    module: module.to_string(),
                    previous: *previous,
                    new,
                }));
            }
            LifecycleOutcome::Refused { .. } => {}
        }
    }

    async fn emit_module_error(&self, module: &str, operation: Operation, message: &str) {
        self.emit(ManagerEvent::ModuleError(ModuleErrorEvent {
            module: module.to_string(),
            operation,
            message: message.into(),
        }));
        if operation != Operation::Initialization && self.options.auto_recovery {
            self.schedule_recovery(module.to_string());
        }
    }

    /// Schedules a `recoverModule` retry after the configured recovery
    /// delay. Only runs if the Manager is still alive when the delay elapses
    /// (mirrors `ModuleCtx`'s "no-op if the back-reference is gone").
    fn schedule_recovery(&self, module: String) {
        let weak = self.weak_self();
        let delay = self.recovery.delay();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return,
            }
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if let Err(err) = manager.recover_module(&module).await {
                tracing::warn!(module = %module, error = %err, "scheduled recovery failed");
            }
        });
    }

    /// `loadModules`. Loads every per-module config document, then collects
    /// and registers every `inventory`-submitted module, seeding the
    /// topological order.
    pub async fn load_modules(&self) -> Result<LoadTally, ManagerError> {
        let configs = self.load_configs().await?;
        let (registry, tally) = Registry::discover_and_build(&self.plugins, &configs).await?;
        self.adopt_registry(registry, tally)
    }

    /// Same as [`Self::load_modules`] but over an explicit module list
    /// instead of the process-wide `inventory` collection. Intended for
    /// tests and for embedders that want to register modules programmatically.
    pub async fn load_modules_from(&self, instances: Vec<Box<dyn crate::module::Module>>) -> Result<LoadTally, ManagerError> {
        let configs = self.load_configs().await?;
        let (registry, tally) = Registry::build_from(&self.plugins, instances, &configs).await?;
        self.adopt_registry(registry, tally)
    }

    async fn load_configs(&self) -> Result<std::collections::HashMap<String, serde_json::Value>, ManagerError> {
        self.config_store.load_all_configs().await.map_err(|source| ManagerError::Configuration {
            module: "*".to_string(),
            source,
        })?;
        Ok(self.config_store.all())
    }

    fn adopt_registry(&self, registry: Registry, tally: LoadTally) -> Result<LoadTally, ManagerError> {
        if self.options.leak_detection_enabled {
            for module in registry.sorted() {
                self.leak_tracker.track_module(module.name(), Arc::downgrade(module));
            }
        }

        *self.registry.write() = registry;

        tracing::info!(
            loaded = tally.loaded,
            disabled = tally.disabled,
            failed = tally.failed,
            "loadModules complete"
        );
        Ok(tally)
    }

    fn sorted_modules(&self) -> Vec<Arc<ModuleRuntime>> {
        self.registry.read().sorted().to_vec()
    }

    /// `initializeModules`. Sequential pass over the sorted order; already
    /// `INITIALIZED` modules are counted and skipped.
    pub async fn initialize_modules(&self) -> Result<(), ManagerError> {
        let modules = self.sorted_modules();

        for module in &modules {
            if module.state() == ModuleState::Initialized {
                continue;
            }

            let hook_ctx = HookContext {
                module: module.name(),
                state: module.state(),
                error: None,
            };
            self.plugins.dispatch(HookPoint::BeforeModuleInitialize, &hook_ctx).await;

            let ctx = self.ctx_for(module.name());
            self.health.track_start(module.name(), "initialization");
            let outcome = module.initialize(&ctx).await;
            let success = matches!(outcome, LifecycleOutcome::Success { .. });
            self.health.track_end(module.name(), "initialization", success, module.state());
            self.note_transition(module.name(), &outcome, module.state());

            if let LifecycleOutcome::Failed { error: err, .. } = &outcome {
                self.health.track_error(module.name(), "initialization");
                self.emit_module_error(module.name(), Operation::Initialization, &err.to_string())
                    .await;
                let error_ctx = HookContext {
                    module: module.name(),
                    state: module.state(),
                    error: Some(err),
                };
                self.plugins.dispatch(HookPoint::OnError, &error_ctx).await;
            }

            let after_ctx = HookContext {
                module: module.name(),
                state: module.state(),
                error: None,
            };
            self.plugins.dispatch(HookPoint::AfterModuleInitialize, &after_ctx).await;
        }

        self.initialized.store(true, Ordering::SeqCst);

        if self.options.memory_analysis_enabled && self.options.memory_analysis_periodic {
            let names: Vec<&'static str> = modules.iter().map(|m| m.name()).collect();
            let weak = self.weak_self();
            Arc::clone(&self.memory_inspector).start(
                self.options.memory_analysis_interval,
                self.options.memory_analysis_initial_delay,
                names,
                move |findings| {
                    if let Some(manager) = weak.upgrade() {
                        manager.emit(ManagerEvent::MemoryLeaks(findings));
                    }
                },
            );
        }

        if self.options.auto_start {
            self.start_modules().await?;
        }

        Ok(())
    }

    /// `startModules`. Requires a prior `initializeModules` pass.
    pub async fn start_modules(&self) -> Result<(), ManagerError> {
        if !self.is_initialized() {
            return Err(ManagerError::NotInitialized);
        }

        let modules = self.sorted_modules();
        for module in &modules {
            let hook_ctx = HookContext {
                module: module.name(),
                state: module.state(),
                error: None,
            };
            self.plugins.dispatch(HookPoint::BeforeModuleStart, &hook_ctx).await;

            let ctx = self.ctx_for(module.name());
            self.health.track_start(module.name(), "start");
            let outcome = module.start(&ctx).await;
            let success = matches!(outcome, LifecycleOutcome::Success { .. });
            self.health.track_end(module.name(), "start", success, module.state());
            self.note_transition(module.name(), &outcome, module.state());

            match outcome {
                LifecycleOutcome::Success { .. } => {}
                LifecycleOutcome::Failed { error: err, .. } => {
                    self.health.track_error(module.name(), "start");
                    self.emit_module_error(module.name(), Operation::Start, &err.to_string()).await;
                    let error_ctx = HookContext {
                        module: module.name(),
                        state: module.state(),
                        error: Some(&err),
                    };
                    self.plugins.dispatch(HookPoint::OnError, &error_ctx).await;
                }
                LifecycleOutcome::Refused { .. } => {}
            }

            let after_ctx = HookContext {
                module: module.name(),
                state: module.state(),
                error: None,
            };
            self.plugins.dispatch(HookPoint::AfterModuleStart, &after_ctx).await;
        }

        self.emit(ManagerEvent::Ready(self.module_status()));
        Ok(())
    }

    /// `stopModules`. Stops the `MemoryInspector` first, then iterates in
    /// reverse sorted order; best-effort, non-running modules are skipped.
    pub async fn stop_modules(&self) -> Result<(), ManagerError> {
        self.memory_inspector.stop();

        let mut modules = self.sorted_modules();
        modules.reverse();

        for module in &modules {
            if module.state() != ModuleState::Running {
                continue;
            }

            let hook_ctx = HookContext {
                module: module.name(),
                state: module.state(),
                error: None,
            };
            self.plugins.dispatch(HookPoint::BeforeModuleStop, &hook_ctx).await;

            let ctx = self.ctx_for(module.name());
            self.health.track_start(module.name(), "stop");
            let outcome = module.stop(&ctx).await;
            let success = matches!(outcome, LifecycleOutcome::Success { .. });
            self.health.track_end(module.name(), "stop", success, module.state());
            self.note_transition(module.name(), &outcome, module.state());

            if let LifecycleOutcome::Failed { error: err, .. } = &outcome {
                self.health.track_error(module.name(), "stop");
                self.emit_module_error(module.name(), Operation::Stop, &err.to_string()).await;
            }

            let after_ctx = HookContext {
                module: module.name(),
                state: module.state(),
                error: None,
            };
            self.plugins.dispatch(HookPoint::AfterModuleStop, &after_ctx).await;
        }

        // Drop every strong handle this pass held before checking for
        // leaks: `modules` itself and the registry's own `Arc`s would
        // otherwise always keep the tracked `Weak`s upgradable, making
        // every graceful shutdown look like a leak.
        drop(modules);
        self.initialized.store(false, Ordering::SeqCst);

        if self.options.leak_check_on_shutdown {
            drop(std::mem::replace(&mut *self.registry.write(), Registry::default()));

            let tracked = self.leak_tracker.tracked_modules();
            let leaks = self.leak_tracker.check_for_leaks(Duration::from_millis(0));
            for name in &tracked {
                if !leaks.contains(name) {
                    tracing::debug!(module = %name, "module released after stop");
                    self.leak_tracker.untrack_module(name);
                }
            }
            if !leaks.is_empty() {
                tracing::warn!(?leaks, "modules still reachable after stop");
            }
        }

        Ok(())
    }

    /// `loadModuleOnDemand`: a single load-plus-initialize-plus-start
    /// pipeline for a module that is already registered but not yet running.
    pub async fn load_module_on_demand(&self, name: &str) -> Result<Option<Arc<ModuleRuntime>>, ManagerError> {
        let Some(module) = self.find_module(name) else {
            return Ok(None);
        };

        let ctx = self.ctx_for(module.name());
        if module.state() == ModuleState::Uninitialized {
            let outcome = module.initialize(&ctx).await;
            self.note_transition(module.name(), &outcome, module.state());
        }
        if matches!(module.state(), ModuleState::Initialized | ModuleState::Stopped) {
            let outcome = module.start(&ctx).await;
            self.note_transition(module.name(), &outcome, module.state());
        }
        Ok(Some(module))
    }

    /// `restartModule(name)`: delegates stop-then-start to the module.
    pub async fn restart_module(&self, name: &str) -> Result<(), ManagerError> {
        let module = self.find_module(name).ok_or_else(|| ManagerError::ModuleNotFound {
            module: name.to_string(),
        })?;
        let ctx = self.ctx_for(module.name());
        if module.state() == ModuleState::Running {
            let outcome = module.stop(&ctx).await;
            self.note_transition(module.name(), &outcome, module.state());
        }
        let outcome = module.start(&ctx).await;
        self.note_transition(module.name(), &outcome, module.state());
        Ok(())
    }

    /// `recoverModule(name)`: requires `ERROR`; runs `reset, initialize,
    /// start` and clears the retry counter on success.
    pub async fn recover_module(&self, name: &str) -> Result<(), ManagerError> {
        let module = self.find_module(name).ok_or_else(|| ManagerError::ModuleNotFound {
            module: name.to_string(),
        })?;

        self.recovery.begin_attempt(name, module.state())?;

        let Some(previous) = module.reset() else {
            return Err(ManagerError::RecoveryNotLegal {
                module: name.to_string(),
                state: module.state().to_string(),
            });
        };
        self.emit(ManagerEvent::StateChanged(StateChange {
            module: name.to_string(),
            previous,
            new: module.state(),
        }));

        let ctx = self.ctx_for(module.name());
        let init_outcome = module.initialize(&ctx).await;
        self.note_transition(module.name(), &init_outcome, module.state());
        if matches!(init_outcome, LifecycleOutcome::Success { .. }) {
            let start_outcome = module.start(&ctx).await;
            self.note_transition(module.name(), &start_outcome, module.state());
            if matches!(start_outcome, LifecycleOutcome::Success { .. }) {
                self.recovery.on_success(name);
            }
        }
        Ok(())
    }

    /// `broadcastEvent(name, payload, sourceName?)`: every `RUNNING` module
    /// except the source, in no particular order.
    pub async fn broadcast_event(&self, name: &str, payload: &serde_json::Value, source: Option<&str>) {
        let modules = self.sorted_modules();
        for module in &modules {
            if module.state() != ModuleState::Running {
                continue;
            }
            if Some(module.name()) == source {
                continue;
            }
            module.on_event(name, payload, source.unwrap_or("")).await;
        }
    }

    #[must_use]
    pub fn get_cached_data(&self, key: &str, max_age: Duration) -> Option<serde_json::Value> {
        let entry = self.cache.get(key)?;
        let (timestamp, data) = entry.value();
        if timestamp.elapsed() > max_age {
            drop(entry);
            self.cache.remove(key);
            return None;
        }
        Some(data.clone())
    }

    pub fn set_cached_data(&self, key: impl Into<String>, data: serde_json::Value) {
        self.cache.insert(key.into(), (Instant::now(), data));
    }

    /// `registerPlugin(p)`: appends, then runs `p.initialize(manager)`.
    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>) {
        plugin.initialize(self).await;
        self.plugins.register(plugin);
    }

    pub fn register_metrics_exporter(&self, exporter: Arc<dyn MetricsExporter>) {
        self.exporters.register(exporter);
    }

    #[must_use]
    pub fn module_status(&self) -> Vec<ModuleStatus> {
        self.sorted_modules()
            .iter()
            .map(|m| ModuleStatus {
                name: m.name().to_string(),
                state: m.state(),
                dependencies: m.meta.dependencies.iter().map(|d| (*d).to_string()).collect(),
                version: m.meta.version.to_string(),
                api_version: m.meta.api_version().to_string(),
                has_error: m.has_error(),
            })
            .collect()
    }

    /// `exportMetrics()`: assembles `{modules, health, memory, timestamp}`
    /// and fans it out to every registered exporter concurrently.
    pub async fn export_metrics(&self) -> serde_json::Value {
        let status = self.module_status();
        let memory = self.memory_inspector.generate_memory_report();
        let health = self.health.system_health();
        let payload = serde_json::json!({
            "modules": status.iter().map(|s| serde_json::json!({
                "name": s.name,
                "state": s.state.to_string(),
                "dependencies": s.dependencies,
                "version": s.version,
                "apiVersion": s.api_version,
                "hasError": s.has_error,
            })).collect::<Vec<_>>(),
            "health": {
                "totalOperations": health.total_operations,
                "totalFailures": health.total_failures,
                "totalErrors": health.total_errors,
            },
            "memory": {
                "heapUsedBytes": memory.heap_used_bytes,
                "heapTotalBytes": memory.heap_total_bytes,
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.exporters.export_all(&payload).await;
        payload
    }

    #[must_use]
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    #[must_use]
    pub fn leak_tracker(&self) -> &LeakTracker {
        &self.leak_tracker
    }

    /// Current retry count the recovery supervisor holds for `name`.
    #[must_use]
    pub fn recovery_attempts(&self, name: &str) -> u32 {
        self.recovery.attempt_count(name)
    }

    #[must_use]
    pub fn memory_inspector(&self) -> &Arc<MemoryInspector> {
        &self.memory_inspector
    }

    #[must_use]
    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
