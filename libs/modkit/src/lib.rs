//! Modular application kernel: the module lifecycle state machine, the
//! dependency-order scheduler that drives it, and the health/memory/leak
//! observers layered on top.

pub mod bootstrap;
pub mod config;
pub mod config_store;
pub mod context;
pub mod error;
pub mod events;
pub mod health;
pub mod leak;
pub mod manager;
pub mod memory;
pub mod module;
pub mod plugin;
pub mod recovery;
pub mod registry;
pub mod severity;
pub mod telemetry;
pub mod update_checker;

pub use config::{ManagerOptions, ResolvedOptions};
pub use context::ModuleCtx;
pub use error::{ConfigStoreError, ManagerError, RegistryError, UpdateCheckerError};
pub use events::ManagerEvent;
pub use manager::Manager;
pub use module::{Module, ModuleMeta, ModuleState};
pub use severity::LogSeverity;

/// Registers a module factory for discovery by [`registry::Registry::discover_and_build`].
///
/// ```ignore
/// modkit::register_module!(|| Box::new(MyModule::default()));
/// ```
#[macro_export]
macro_rules! register_module {
    ($factory:expr) => {
        $crate::inventory::submit! {
            $crate::registry::ModuleFactory($factory)
        }
    };
}

#[doc(hidden)]
pub use inventory;
