//! Kernel-level construction options and their environment-variable
//! overrides.
//!
//! `ManagerOptions` is the struct an embedder deserializes from whatever
//! source it likes (file, env, CLI flags); [`ManagerOptions::resolve`]
//! applies the precedence explicit value > environment variable > built-in
//! default and produces a plain [`ResolvedOptions`] with no optionality left.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryAnalysisOptions {
    pub enabled: Option<bool>,
    pub periodic: Option<bool>,
    pub initial_delay_ms: Option<u64>,
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeakDetectionOptions {
    pub enabled: Option<bool>,
    pub check_on_shutdown: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCheckOptions {
    pub enabled: Option<bool>,
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginSpec {
    pub path: String,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// Raw, embedder-supplied construction options. Every overridable field is
/// `Option` so [`Self::resolve`] can tell "absent" from "explicitly false".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManagerOptions {
    pub modules_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub auto_start: Option<bool>,
    pub auto_recovery: Option<bool>,
    #[serde(default)]
    pub memory_analysis: MemoryAnalysisOptions,
    #[serde(default)]
    pub leak_detection: LeakDetectionOptions,
    #[serde(default)]
    pub update_check: UpdateCheckOptions,
    pub shutdown_timeout_ms: Option<u64>,
    pub recovery_max_attempts: Option<u32>,
    pub recovery_delay_ms: Option<u64>,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

/// Fully-resolved options with every field defaulted; this is what
/// [`crate::manager::Manager`] actually consults.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub modules_path: PathBuf,
    pub config_path: PathBuf,
    pub auto_start: bool,
    pub auto_recovery: bool,
    pub memory_analysis_enabled: bool,
    pub memory_analysis_periodic: bool,
    pub memory_analysis_initial_delay: Duration,
    pub memory_analysis_interval: Duration,
    pub leak_detection_enabled: bool,
    pub leak_check_on_shutdown: bool,
    pub update_check_enabled: bool,
    pub update_check_delay: Duration,
    pub shutdown_timeout: Duration,
    pub recovery_max_attempts: u32,
    pub recovery_delay: Duration,
    pub plugins: Vec<PluginSpec>,
}

impl ManagerOptions {
    /// Applies explicit value > environment variable > built-in default.
    ///
    /// `NODE_ENV` is read only to stay wire-compatible with the legacy
    /// environment table; it selected a dev/prod module-resolution split
    /// upstream, and discovery here is compile-time registration, so it has
    /// no remaining effect.
    #[must_use]
    pub fn resolve(self) -> ResolvedOptions {
        if let Some(node_env) = env_string("NODE_ENV") {
            tracing::debug!(node_env, "NODE_ENV observed, no effect on module discovery");
        }

        ResolvedOptions {
            modules_path: self.modules_path.unwrap_or_else(|| PathBuf::from("./modules")),
            config_path: self
                .config_path
                .or_else(|| env_string("CONFIG_PATH").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./config")),
            auto_start: self.auto_start.unwrap_or(true),
            auto_recovery: self
                .auto_recovery
                .or_else(|| env_bool("AUTO_RECOVERY"))
                .unwrap_or(true),
            memory_analysis_enabled: self
                .memory_analysis
                .enabled
                .or_else(|| env_bool("ENABLE_MEMORY_ANALYSIS"))
                .unwrap_or(true),
            memory_analysis_periodic: self
                .memory_analysis
                .periodic
                .or_else(|| env_bool("ENABLE_PERIODIC_MEMORY_ANALYSIS"))
                .unwrap_or(true),
            memory_analysis_initial_delay: Duration::from_millis(
                self.memory_analysis
                    .initial_delay_ms
                    .or_else(|| env_u64("MEMORY_ANALYSIS_INITIAL_DELAY"))
                    .unwrap_or(30_000),
            ),
            memory_analysis_interval: Duration::from_millis(
                self.memory_analysis
                    .interval_ms
                    .or_else(|| env_u64("MEMORY_ANALYSIS_INTERVAL"))
                    .unwrap_or(300_000),
            ),
            leak_detection_enabled: self
                .leak_detection
                .enabled
                .or_else(|| env_bool("ENABLE_LEAK_DETECTION"))
                .unwrap_or(true),
            leak_check_on_shutdown: self
                .leak_detection
                .check_on_shutdown
                .or_else(|| env_bool("CHECK_LEAKS_ON_SHUTDOWN"))
                .unwrap_or(true),
            update_check_enabled: self.update_check.enabled.unwrap_or(false),
            update_check_delay: Duration::from_millis(
                self.update_check
                    .delay_ms
                    .or_else(|| env_u64("UPDATE_CHECK_DELAY"))
                    .unwrap_or(60_000),
            ),
            shutdown_timeout: Duration::from_millis(
                self.shutdown_timeout_ms
                    .or_else(|| env_u64("SHUTDOWN_TIMEOUT"))
                    .unwrap_or(10_000),
            ),
            recovery_max_attempts: self.recovery_max_attempts.unwrap_or(3),
            recovery_delay: Duration::from_millis(self.recovery_delay_ms.unwrap_or(5_000)),
            plugins: self.plugins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_applies_hardcoded_defaults_when_nothing_set() {
        temp_env::with_vars_unset(
            ["CONFIG_PATH", "AUTO_RECOVERY", "SHUTDOWN_TIMEOUT"],
            || {
                let resolved = ManagerOptions::default().resolve();
                assert_eq!(resolved.modules_path, PathBuf::from("./modules"));
                assert!(resolved.auto_start);
                assert_eq!(resolved.shutdown_timeout, Duration::from_millis(10_000));
            },
        );
    }

    #[test]
    fn explicit_value_wins_over_environment() {
        temp_env::with_var("SHUTDOWN_TIMEOUT", Some("999"), || {
            let mut opts = ManagerOptions::default();
            opts.shutdown_timeout_ms = Some(42);
            let resolved = opts.resolve();
            assert_eq!(resolved.shutdown_timeout, Duration::from_millis(42));
        });
    }

    #[test]
    fn environment_wins_over_hardcoded_default() {
        temp_env::with_var("SHUTDOWN_TIMEOUT", Some("999"), || {
            let resolved = ManagerOptions::default().resolve();
            assert_eq!(resolved.shutdown_timeout, Duration::from_millis(999));
        });
    }
}
