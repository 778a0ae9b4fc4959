//! Module discovery, registration, and the dependency-order scheduler.
//!
//! Native discovery has no dynamic `import()`; a concrete module crate
//! registers itself at compile time via `inventory::submit!` instead of
//! being found by walking `modulesPath` (see `SPEC_FULL.md` §4.2, §9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::module::{Module, ModuleRuntime, ModuleState};
use crate::plugin::{HookContext, HookPoint, PluginChain};

/// Factory collected at link time for every module that registers itself.
pub struct ModuleFactory(pub fn() -> Box<dyn Module>);

inventory::collect!(ModuleFactory);

/// Tally produced by a discovery/load pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadTally {
    pub loaded: usize,
    pub disabled: usize,
    pub failed: usize,
}

/// Owns every registered module and the topologically-sorted order to drive
/// them through lifecycle passes in.
#[derive(Default)]
pub struct Registry {
    by_name: HashMap<&'static str, Arc<ModuleRuntime>>,
    sorted: Vec<Arc<ModuleRuntime>>,
}

impl Registry {
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<ModuleRuntime>> {
        self.by_name.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Modules in topological (dependency-first) order.
    #[must_use]
    pub fn sorted(&self) -> &[Arc<ModuleRuntime>] {
        &self.sorted
    }

    /// Instantiate every `inventory`-registered module, skip disabled ones,
    /// register the rest, and compute the topological order.
    ///
    /// `configs` supplies each module's own config document so a
    /// `"disabled": true` key there also skips the module, matching the
    /// original metadata-or-config disablement rule.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateName`] for a repeated module name
    /// or [`RegistryError::CycleDetected`] if the dependency graph has a
    /// cycle.
    pub async fn discover_and_build(
        plugins: &PluginChain,
        configs: &HashMap<String, serde_json::Value>,
    ) -> Result<(Self, LoadTally), RegistryError> {
        let instances = inventory::iter::<ModuleFactory>.into_iter().map(|f| (f.0)()).collect();
        Self::build_from(plugins, instances, configs).await
    }

    /// Same registration/ordering logic as [`Self::discover_and_build`], but
    /// over an explicit module list instead of the process-wide `inventory`
    /// collection. This is what end-to-end tests use: `inventory` entries are
    /// global to the test binary, so constructing fixture modules directly
    /// keeps each test's dependency graph isolated from every other test's.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateName`] for a repeated module name
    /// or [`RegistryError::CycleDetected`] if the dependency graph has a
    /// cycle.
    pub async fn build_from(
        plugins: &PluginChain,
        instances: Vec<Box<dyn Module>>,
        configs: &HashMap<String, serde_json::Value>,
    ) -> Result<(Self, LoadTally), RegistryError> {
        let mut registry = Self::default();
        let mut tally = LoadTally::default();

        for module in instances {
            let meta = module.meta();
            let name = meta.name;

            let before_ctx = HookContext {
                module: name,
                state: ModuleState::Uninitialized,
                error: None,
            };
            plugins.dispatch(HookPoint::BeforeModuleLoad, &before_ctx).await;

            let config_disabled = configs
                .get(name)
                .and_then(|c| c.get("disabled"))
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);

            if meta.disabled || config_disabled {
                tracing::info!(module = name, "module skipped: disabled");
                tally.disabled += 1;
                continue;
            }

            if registry.by_name.contains_key(name) {
                tally.failed += 1;
                return Err(RegistryError::DuplicateName(name.to_string()));
            }

            let runtime = Arc::new(ModuleRuntime::new(module));
            registry.by_name.insert(name, runtime);
            tally.loaded += 1;

            let after_ctx = HookContext {
                module: name,
                state: ModuleState::Uninitialized,
                error: None,
            };
            plugins.dispatch(HookPoint::AfterModuleLoad, &after_ctx).await;
        }

        registry.validate_dependencies();
        registry.sorted = topo_sort(&registry.by_name)?;

        tracing::info!(
            loaded = tally.loaded,
            disabled = tally.disabled,
            failed = tally.failed,
            "module discovery complete"
        );

        Ok((registry, tally))
    }

    /// Logs (non-fatal) warnings for dependencies that are missing or whose
    /// `apiVersion` falls short of the declared minimum.
    fn validate_dependencies(&self) {
        for module in self.by_name.values() {
            for dep in &module.meta.dependencies {
                match self.by_name.get(dep) {
                    None => {
                        tracing::warn!(
                            module = module.name(),
                            dependency = *dep,
                            "dependency is not registered"
                        );
                    }
                    Some(dep_entry) => {
                        if let Some(min) = module.meta.dependency_versions.get(dep) {
                            if crate::update_checker::compare_versions(
                                dep_entry.meta.api_version(),
                                min,
                            ) < 0
                            {
                                tracing::warn!(
                                    module = module.name(),
                                    dependency = *dep,
                                    required = *min,
                                    actual = dep_entry.meta.api_version(),
                                    "dependency apiVersion is below the required minimum"
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Mark {
    Visiting,
    Done,
}

/// DFS-based topological sort seeded in descending `priority` order so that
/// higher-priority modules land earlier when the dependency graph allows it.
/// A `visiting` set detects cycles and the full cycle path is reported.
fn topo_sort(
    by_name: &HashMap<&'static str, Arc<ModuleRuntime>>,
) -> Result<Vec<Arc<ModuleRuntime>>, RegistryError> {
    let mut order: Vec<&Arc<ModuleRuntime>> = by_name.values().collect();
    order.sort_by(|a, b| b.meta.priority.cmp(&a.meta.priority));

    let mut marks: HashMap<&'static str, Mark> = HashMap::new();
    let mut path: Vec<&'static str> = Vec::new();
    let mut sorted: Vec<Arc<ModuleRuntime>> = Vec::new();

    for module in order {
        if !marks.contains_key(module.name()) {
            visit(module, by_name, &mut marks, &mut path, &mut sorted)?;
        }
    }

    Ok(sorted)
}

fn visit(
    node: &Arc<ModuleRuntime>,
    by_name: &HashMap<&'static str, Arc<ModuleRuntime>>,
    marks: &mut HashMap<&'static str, Mark>,
    path: &mut Vec<&'static str>,
    sorted: &mut Vec<Arc<ModuleRuntime>>,
) -> Result<(), RegistryError> {
    match marks.get(node.name()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == node.name()).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(node.name().to_string());
            return Err(RegistryError::CycleDetected { path: cycle });
        }
        None => {}
    }

    marks.insert(node.name(), Mark::Visiting);
    path.push(node.name());

    for dep in &node.meta.dependencies {
        // Unregistered dependencies were already warned about in
        // `validate_dependencies`; the DFS silently skips them.
        if let Some(dep_node) = by_name.get(dep) {
            visit(dep_node, by_name, marks, path, sorted)?;
        }
    }

    path.pop();
    marks.insert(node.name(), Mark::Done);
    sorted.push(Arc::clone(node));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleCtx;
    use async_trait::async_trait;

    struct Dummy {
        meta: ModuleMetaForTest,
    }

    struct ModuleMetaForTest {
        name: &'static str,
        deps: Vec<&'static str>,
        priority: i32,
    }

    #[async_trait]
    impl Module for Dummy {
        fn meta(&self) -> crate::module::ModuleMeta {
            crate::module::ModuleMeta::new(self.meta.name, "1.0.0")
                .with_dependencies(self.meta.deps.clone())
                .with_priority(self.meta.priority)
        }

        async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn entry(name: &'static str, deps: Vec<&'static str>) -> Arc<ModuleRuntime> {
        Arc::new(ModuleRuntime::new(Box::new(Dummy {
            meta: ModuleMetaForTest {
                name,
                deps,
                priority: 50,
            },
        })))
    }

    #[test]
    fn topo_sort_orders_dependencies_first() {
        let mut by_name = HashMap::new();
        by_name.insert("A", entry("A", vec!["B", "C"]));
        by_name.insert("B", entry("B", vec!["C"]));
        by_name.insert("C", entry("C", vec![]));

        let sorted = topo_sort(&by_name).unwrap();
        let names: Vec<_> = sorted.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["C", "B", "A"]);
    }

    #[test]
    fn topo_sort_detects_cycle_with_path() {
        let mut by_name = HashMap::new();
        by_name.insert("A", entry("A", vec!["B"]));
        by_name.insert("B", entry("B", vec!["A"]));

        let err = topo_sort(&by_name).unwrap_err();
        match err {
            RegistryError::CycleDetected { path } => {
                assert!(path.contains(&"A".to_string()));
                assert!(path.contains(&"B".to_string()));
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn topo_sort_skips_unregistered_dependency() {
        let mut by_name = HashMap::new();
        by_name.insert("A", entry("A", vec!["missing"]));

        let sorted = topo_sort(&by_name).unwrap();
        assert_eq!(sorted.len(), 1);
    }
}
