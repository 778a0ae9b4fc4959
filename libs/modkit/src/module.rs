//! The per-module state machine and the `Module` extension contract.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::context::ModuleCtx;

/// The eight lifecycle phases a module passes through.
///
/// `WARNING`/`DEBUG` from the legacy surface are not lifecycle states; see
/// [`crate::severity::LogSeverity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

impl ModuleState {
    /// Whether `self -> next` is a legal transition per the lifecycle table.
    ///
    /// Any unlisted transition is a programmer error and must be refused
    /// with a warning at the call site, not treated as a panic.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Initializing)
                | (Self::Initializing, Self::Initialized | Self::Error)
                | (Self::Initialized, Self::Starting)
                | (Self::Starting, Self::Running | Self::Error)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped | Self::Error)
                | (Self::Stopped, Self::Starting)
                | (Self::Error, Self::Uninitialized)
        )
    }
}

/// Static metadata a concrete module declares about itself.
#[derive(Debug, Clone)]
pub struct ModuleMeta {
    pub name: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    /// Defaults to `version` when `None`.
    pub api_version: Option<&'static str>,
    pub dependencies: Vec<&'static str>,
    /// Minimum required `api_version` per dependency name.
    pub dependency_versions: HashMap<&'static str, &'static str>,
    pub disabled: bool,
    pub priority: i32,
}

impl ModuleMeta {
    #[must_use]
    pub fn new(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            description: "",
            version,
            api_version: None,
            dependencies: Vec::new(),
            dependency_versions: HashMap::new(),
            disabled: false,
            priority: 50,
        }
    }

    #[must_use]
    pub fn api_version(&self) -> &'static str {
        self.api_version.unwrap_or(self.version)
    }

    #[must_use]
    pub fn with_dependencies(mut self, deps: Vec<&'static str>) -> Self {
        self.dependencies = deps;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

/// The contract every concrete module implements.
///
/// The kernel never calls these directly from user code; they are invoked by
/// [`ModuleRuntime`] under the lifecycle guard, which is what actually
/// enforces the state machine.
#[async_trait]
pub trait Module: Send + Sync {
    fn meta(&self) -> ModuleMeta;

    async fn on_initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;

    async fn on_start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked by the event bus for every `broadcastEvent` this module did
    /// not originate. Exceptions here are caught per-receiver by the caller.
    async fn on_event(&self, _name: &str, _payload: &serde_json::Value, _source: &str) {}

    /// Invoked on the registered `auth` module when a peer's local
    /// permission map has no verdict for `resource`/`action`. Defaults to
    /// allow, matching `checkPermission`'s "otherwise allow" fallback when
    /// no `auth` module overrides it.
    async fn check_permission(&self, _module: &str, _resource: &str, _action: &str) -> bool {
        true
    }
}

/// Kernel-owned runtime wrapper around a concrete [`Module`]: the actual
/// state machine, error slot, exports, permissions and uptime clock.
///
/// The Manager owns every `ModuleRuntime` exclusively; all other references
/// to it (from [`crate::memory`], [`crate::leak`]) must be non-owning.
pub struct ModuleRuntime {
    pub meta: ModuleMeta,
    inner: Box<dyn Module>,
    state: parking_lot::RwLock<ModuleState>,
    last_error: parking_lot::RwLock<Option<String>>,
    exports: parking_lot::RwLock<HashMap<String, serde_json::Value>>,
    permissions: parking_lot::RwLock<HashMap<String, HashSet<String>>>,
    start_timestamp: parking_lot::RwLock<Option<Instant>>,
}

/// Outcome of a single lifecycle call, used by the Manager to decide what to
/// record in the HealthTracker and which `stateChange`/error event to emit.
pub enum LifecycleOutcome {
    /// The transition was legal and `onX` succeeded.
    Success { previous: ModuleState },
    /// The transition was legal but `onX` failed; state is now `ERROR`.
    Failed { previous: ModuleState, error: anyhow::Error },
    /// The transition itself was illegal from the current state; nothing
    /// ran. Logged as a warning, never a crash.
    Refused { from: ModuleState },
}

impl ModuleRuntime {
    pub fn new(inner: Box<dyn Module>) -> Self {
        let meta = inner.meta();
        Self {
            meta,
            inner,
            state: parking_lot::RwLock::new(ModuleState::Uninitialized),
            last_error: parking_lot::RwLock::new(None),
            exports: parking_lot::RwLock::new(HashMap::new()),
            permissions: parking_lot::RwLock::new(HashMap::new()),
            start_timestamp: parking_lot::RwLock::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.meta.name
    }

    #[must_use]
    pub fn state(&self) -> ModuleState {
        *self.state.read()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.last_error.read().is_some()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ModuleState::Running
    }

    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.start_timestamp.read().map(|t| t.elapsed())
    }

    fn set_state(&self, next: ModuleState) {
        *self.state.write() = next;
    }

    fn try_transition(&self, next: ModuleState) -> Option<ModuleState> {
        let mut guard = self.state.write();
        if guard.can_transition_to(next) {
            let prev = *guard;
            *guard = next;
            Some(prev)
        } else {
            None
        }
    }

    /// `initialize()`. Requires `UNINITIALIZED`; idempotent (warns, no-op)
    /// once already `INITIALIZED` or later.
    pub async fn initialize(&self, ctx: &ModuleCtx) -> LifecycleOutcome {
        let current = self.state();
        if current != ModuleState::Uninitialized {
            tracing::warn!(module = self.name(), state = %current, "initialize() called again; ignoring");
            return LifecycleOutcome::Refused { from: current };
        }
        let Some(previous) = self.try_transition(ModuleState::Initializing) else {
            return LifecycleOutcome::Refused { from: current };
        };
        match self.inner.on_initialize(ctx).await {
            Ok(()) => {
                self.set_state(ModuleState::Initialized);
                LifecycleOutcome::Success { previous }
            }
            Err(err) => {
                self.set_state(ModuleState::Error);
                *self.last_error.write() = Some(err.to_string());
                LifecycleOutcome::Failed { previous, error: err }
            }
        }
    }

    /// `start()`. Legal from `INITIALIZED` or `STOPPED`.
    pub async fn start(&self, ctx: &ModuleCtx) -> LifecycleOutcome {
        let current = self.state();
        if !matches!(current, ModuleState::Initialized | ModuleState::Stopped) {
            tracing::warn!(module = self.name(), state = %current, "start() refused from this state");
            return LifecycleOutcome::Refused { from: current };
        }
        self.set_state(ModuleState::Starting);
        match self.inner.on_start(ctx).await {
            Ok(()) => {
                self.set_state(ModuleState::Running);
                *self.start_timestamp.write() = Some(Instant::now());
                LifecycleOutcome::Success { previous: current }
            }
            Err(err) => {
                self.set_state(ModuleState::Error);
                *self.last_error.write() = Some(err.to_string());
                LifecycleOutcome::Failed { previous: current, error: err }
            }
        }
    }

    /// `stop()`. Legal only from `RUNNING`.
    pub async fn stop(&self, ctx: &ModuleCtx) -> LifecycleOutcome {
        let current = self.state();
        if current != ModuleState::Running {
            tracing::warn!(module = self.name(), state = %current, "stop() refused: not RUNNING");
            return LifecycleOutcome::Refused { from: current };
        }
        self.set_state(ModuleState::Stopping);
        match self.inner.on_stop(ctx).await {
            Ok(()) => {
                self.set_state(ModuleState::Stopped);
                *self.start_timestamp.write() = None;
                LifecycleOutcome::Success { previous: current }
            }
            Err(err) => {
                self.set_state(ModuleState::Error);
                *self.last_error.write() = Some(err.to_string());
                LifecycleOutcome::Failed { previous: current, error: err }
            }
        }
    }

    /// `reset()`. Only legal recovery from `ERROR`; returns the state it
    /// transitioned out of so the caller can report a `stateChange`.
    pub fn reset(&self) -> Option<ModuleState> {
        let mut guard = self.state.write();
        if guard.can_transition_to(ModuleState::Uninitialized) {
            let previous = *guard;
            *guard = ModuleState::Uninitialized;
            drop(guard);
            *self.last_error.write() = None;
            Some(previous)
        } else {
            None
        }
    }

    pub async fn on_event(&self, name: &str, payload: &serde_json::Value, source: &str) {
        self.inner.on_event(name, payload, source).await;
    }

    pub async fn check_permission(&self, module: &str, resource: &str, action: &str) -> bool {
        self.inner.check_permission(module, resource, action).await
    }

    pub fn export(&self, key: impl Into<String>, value: serde_json::Value) {
        self.exports.write().insert(key.into(), value);
    }

    #[must_use]
    pub fn get_export(&self, key: &str) -> Option<serde_json::Value> {
        self.exports.read().get(key).cloned()
    }

    #[must_use]
    pub fn all_exports(&self) -> HashMap<String, serde_json::Value> {
        self.exports.read().clone()
    }

    pub fn grant_permission(&self, resource: impl Into<String>, action: impl Into<String>) {
        self.permissions
            .write()
            .entry(resource.into())
            .or_default()
            .insert(action.into());
    }

    pub fn revoke_permission(&self, resource: &str, action: &str) {
        if let Some(actions) = self.permissions.write().get_mut(resource) {
            actions.remove(action);
        }
    }

    /// Local-only permission lookup; the Manager-level `auth` deferral lives
    /// in [`ModuleCtx::check_permission`].
    #[must_use]
    pub fn has_local_permission(&self, resource: &str, action: &str) -> Option<bool> {
        self.permissions
            .read()
            .get(resource)
            .map(|actions| actions.contains(action))
    }
}
