//! Error taxonomy for the kernel.
//!
//! Every fallible kernel operation returns one of these variants rather than
//! a bare `String` or `anyhow::Error`; `anyhow` is reserved for the outer
//! host/bootstrap boundary where errors are simply logged and propagated.

use thiserror::Error;

/// Errors raised while registering modules or building the dependency schedule.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module '{0}' is already registered")]
    DuplicateName(String),

    #[error("circular dependency detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("module '{module}' declares dependency on unregistered module '{depends_on}'")]
    UnknownDependency { module: String, depends_on: String },
}

/// Errors surfaced by `Manager` lifecycle operations.
///
/// Most per-module failures (`LifecycleError`, `PluginError`) are caught at
/// the phase loop and turned into a `moduleError` event rather than
/// returned here; this enum covers the failures that abort the calling
/// operation outright.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("configuration error for module '{module}': {source}")]
    Configuration {
        module: String,
        #[source]
        source: ConfigStoreError,
    },

    #[error("start requires initializeModules() to have completed first")]
    NotInitialized,

    #[error("recovery for module '{module}' is not legal from state {state}")]
    RecoveryNotLegal { module: String, state: String },

    #[error("recovery for module '{module}' exhausted after {attempts} attempt(s)")]
    RecoveryExhausted { module: String, attempts: u32 },

    #[error("module '{module}' not found")]
    ModuleNotFound { module: String },

    #[error("shutdown exceeded deadline of {timeout_ms}ms")]
    ShutdownTimeout { timeout_ms: u64 },
}

/// Errors raised by [`crate::config_store::ConfigStore`].
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("failed to read config document for '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config document for '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config document for '{name}' is not valid JSON: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by [`crate::update_checker::UpdateChecker`].
#[derive(Debug, Error)]
pub enum UpdateCheckerError {
    #[error("failed to read package metadata for '{module}': {source}")]
    ReadMetadata {
        module: String,
        #[source]
        source: std::io::Error,
    },

    #[error("package metadata for '{module}' is not valid JSON: {source}")]
    ParseMetadata {
        module: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("repository URL '{url}' for module '{module}' is not a recognized shape")]
    UnrecognizedRepositoryUrl { module: String, url: String },

    #[error("remote version query for '{module}' failed: {source}")]
    RemoteQuery {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}
