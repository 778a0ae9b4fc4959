//! Signal and event payloads exchanged between [`crate::module::Module`] and
//! [`crate::manager::Manager`].
//!
//! Delivery is synchronous and happens inline within the lifecycle call that
//! produced it, matching the observer pattern described for the Module/Manager
//! back-reference.

use crate::module::ModuleState;
use std::sync::Arc;

/// Emitted whenever a module's lifecycle state changes.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub module: String,
    pub previous: ModuleState,
    pub new: ModuleState,
}

/// The lifecycle operation during which a module error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Initialization,
    Start,
    Stop,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialization => "initialization",
            Self::Start => "start",
            Self::Stop => "stop",
        };
        write!(f, "{s}")
    }
}

/// Emitted when a module's `onInitialize`/`onStart`/`onStop` override fails.
#[derive(Debug, Clone)]
pub struct ModuleError {
    pub module: String,
    pub operation: Operation,
    pub message: Arc<str>,
}

/// A snapshot of one module included in the `ready` event payload.
#[derive(Debug, Clone)]
pub struct ModuleStatus {
    pub name: String,
    pub state: ModuleState,
    pub dependencies: Vec<String>,
    pub version: String,
    pub api_version: String,
    pub has_error: bool,
}

/// Top-level events observable on the [`crate::manager::Manager`].
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// All modules completed the start pass.
    Ready(Vec<ModuleStatus>),
    /// A module-scoped lifecycle failure.
    ModuleError(ModuleError),
    /// A module's lifecycle state flipped.
    StateChanged(StateChange),
    /// Findings from a memory growth-rate sweep.
    MemoryLeaks(Vec<crate::memory::LeakFinding>),
}
