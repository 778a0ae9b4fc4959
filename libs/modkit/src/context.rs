//! Per-call handle passed into `onInitialize`/`onStart`/`onStop`/`onEvent`.
//!
//! `ModuleCtx` IS the weak back-reference to the Manager described in the
//! design notes: it holds a non-owning [`std::sync::Weak`] handle installed
//! at registration, and every inter-module helper no-ops with a warning if
//! the Manager has since been torn down.

use std::sync::Weak;

use crate::manager::Manager;

#[derive(Clone)]
pub struct ModuleCtx {
    pub(crate) module_name: &'static str,
    pub(crate) manager: Weak<Manager>,
    pub(crate) config: serde_json::Value,
}

impl ModuleCtx {
    pub(crate) fn new(module_name: &'static str, manager: Weak<Manager>, config: serde_json::Value) -> Self {
        Self {
            module_name,
            manager,
            config,
        }
    }

    #[must_use]
    pub fn module_name(&self) -> &'static str {
        self.module_name
    }

    /// This module's own config document, as loaded by `ConfigStore`.
    #[must_use]
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    fn manager_or_warn(&self, action: &str) -> Option<std::sync::Arc<Manager>> {
        match self.manager.upgrade() {
            Some(m) => Some(m),
            None => {
                tracing::warn!(
                    module = self.module_name,
                    action,
                    "Manager back-reference is gone; ignoring"
                );
                None
            }
        }
    }

    /// `getExportsFromModule(name, key?)`. Returns `None` if the Manager is
    /// gone, the peer is unregistered, or the key is absent.
    #[must_use]
    pub fn get_exports_from_module(&self, name: &str, key: Option<&str>) -> Option<serde_json::Value> {
        let manager = self.manager_or_warn("getExportsFromModule")?;
        let entry = manager.find_module(name)?;
        match key {
            Some(k) => entry.get_export(k),
            None => Some(serde_json::to_value(entry.all_exports()).unwrap_or(serde_json::Value::Null)),
        }
    }

    /// `getModuleInstance(name)`. `true` when the peer is registered.
    #[must_use]
    pub fn has_module_instance(&self, name: &str) -> bool {
        self.manager_or_warn("getModuleInstance")
            .is_some_and(|m| m.find_module(name).is_some())
    }

    /// `isModuleAPICompatible(name, minVersion)`.
    #[must_use]
    pub fn is_module_api_compatible(&self, name: &str, min_version: &str) -> bool {
        let Some(manager) = self.manager_or_warn("isModuleAPICompatible") else {
            return false;
        };
        let Some(entry) = manager.find_module(name) else {
            return false;
        };
        crate::update_checker::compare_versions(entry.meta.api_version(), min_version) >= 0
    }

    /// `broadcastEvent(name, payload)`, sourced from this module.
    pub async fn broadcast_event(&self, name: &str, payload: &serde_json::Value) {
        if let Some(manager) = self.manager_or_warn("broadcastEvent") {
            manager.broadcast_event(name, payload, Some(self.module_name)).await;
        }
    }

    /// `checkPermission(action, resource)`: local map, then a delegated
    /// `check_permission(module, resource, action)` call on the `auth` peer
    /// if one is registered, otherwise allow.
    pub async fn check_permission(&self, resource: &str, action: &str) -> bool {
        let Some(manager) = self.manager_or_warn("checkPermission") else {
            return true;
        };
        let Some(entry) = manager.find_module(self.module_name) else {
            return true;
        };
        if let Some(local) = entry.has_local_permission(resource, action) {
            return local;
        }
        if let Some(auth) = manager.find_module("auth") {
            return auth.check_permission(self.module_name, resource, action).await;
        }
        true
    }

    pub fn grant_permission(&self, resource: impl Into<String>, action: impl Into<String>) {
        if let Some(manager) = self.manager_or_warn("grantPermission") {
            if let Some(entry) = manager.find_module(self.module_name) {
                entry.grant_permission(resource, action);
            }
        }
    }

    pub fn revoke_permission(&self, resource: &str, action: &str) {
        if let Some(manager) = self.manager_or_warn("revokePermission") {
            if let Some(entry) = manager.find_module(self.module_name) {
                entry.revoke_permission(resource, action);
            }
        }
    }
}
