//! End-to-end lifecycle scenarios driven against `Manager::load_modules_from`
//! with small fixture modules, never via `inventory::submit!` — `inventory`
//! registrations are global to the whole test binary, so sharing them across
//! these scenarios would leak one test's dependency graph into another's.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modkit::{Manager, ManagerEvent, ManagerOptions, Module, ModuleCtx, ModuleMeta, ModuleState};

fn options_with(config_dir: &std::path::Path) -> ManagerOptions {
    let mut opts = ManagerOptions::default();
    opts.config_path = Some(config_dir.to_path_buf());
    opts.auto_start = Some(false);
    opts.memory_analysis.enabled = Some(false);
    opts.memory_analysis.periodic = Some(false);
    opts
}

/// Records lifecycle calls it receives into a shared log, in order.
struct Recorder {
    name: &'static str,
    deps: Vec<&'static str>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Module for Recorder {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta::new(self.name, "1.0.0").with_dependencies(self.deps.clone())
    }

    async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(self.name.to_string());
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(self.name.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn scenario_1_topological_order() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(options_with(dir.path()).resolve());

    let log = Arc::new(Mutex::new(Vec::new()));

    let instances: Vec<Box<dyn Module>> = vec![
        Box::new(Recorder { name: "A", deps: vec!["B", "C"], log: Arc::clone(&log) }),
        Box::new(Recorder { name: "B", deps: vec!["C"], log: Arc::clone(&log) }),
        Box::new(Recorder { name: "C", deps: vec![], log: Arc::clone(&log) }),
    ];
    manager.load_modules_from(instances).await.unwrap();

    manager.initialize_modules().await.unwrap();
    manager.start_modules().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["C", "B", "A"]);

    log.lock().unwrap().clear();
    manager.stop_modules().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
}

struct CycleModule {
    name: &'static str,
    dep: &'static str,
}

#[async_trait]
impl Module for CycleModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta::new(self.name, "1.0.0").with_dependencies(vec![self.dep])
    }

    async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn scenario_2_cycle_detection() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(options_with(dir.path()).resolve());

    let instances: Vec<Box<dyn Module>> = vec![
        Box::new(CycleModule { name: "A", dep: "B" }),
        Box::new(CycleModule { name: "B", dep: "A" }),
    ];
    let err = manager.load_modules_from(instances).await.unwrap_err();
    let message = err.to_string().to_lowercase();
    assert!(message.contains("circular dependency"), "unexpected message: {message}");
    assert!(message.contains('a') && message.contains('b'));
}

struct DisabledLeafA;
struct DisabledLeafB;

#[async_trait]
impl Module for DisabledLeafA {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta::new("A", "1.0.0").with_dependencies(vec!["B"])
    }

    async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        anyhow::bail!("B unavailable")
    }
}

#[async_trait]
impl Module for DisabledLeafB {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta::new("B", "1.0.0").with_disabled(true)
    }

    async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn scenario_3_disabled_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(options_with(dir.path()).resolve());
    let mut events = manager.subscribe();

    let instances: Vec<Box<dyn Module>> = vec![Box::new(DisabledLeafA), Box::new(DisabledLeafB)];
    let tally = manager.load_modules_from(instances).await.unwrap();
    assert_eq!(tally.loaded, 1);
    assert_eq!(tally.disabled, 1);

    manager.initialize_modules().await.unwrap();

    let a = manager.find_module("A").unwrap();
    assert_eq!(a.state(), ModuleState::Error);
    assert!(a.has_error());

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    match event {
        ManagerEvent::ModuleError(err) => {
            assert_eq!(err.module, "A");
            assert!(err.message.contains("B unavailable"));
        }
        other => panic!("expected ModuleError, got {other:?}"),
    }
}

struct FlakyStart {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Module for FlakyStart {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta::new("A", "1.0.0")
    }

    async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("transient start failure")
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn scenario_4_partial_failure_and_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options_with(dir.path());
    opts.recovery_max_attempts = Some(2);
    opts.recovery_delay_ms = Some(10);
    opts.auto_recovery = Some(true);
    let manager = Manager::new(opts.resolve());
    let mut events = manager.subscribe();

    let attempts = Arc::new(AtomicUsize::new(0));
    let instances: Vec<Box<dyn Module>> = vec![Box::new(FlakyStart { attempts: Arc::clone(&attempts) })];
    manager.load_modules_from(instances).await.unwrap();
    manager.initialize_modules().await.unwrap();
    manager.start_modules().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    match event {
        ManagerEvent::ModuleError(err) => {
            assert_eq!(err.module, "A");
            assert_eq!(err.operation.to_string(), "start");
        }
        other => panic!("expected ModuleError, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    let a = manager.find_module("A").unwrap();
    assert_eq!(a.state(), ModuleState::Running);
    assert_eq!(manager.recovery_attempts("A"), 0);
}

struct NoopModule {
    name: &'static str,
}

#[async_trait]
impl Module for NoopModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta::new(self.name, "1.0.0")
    }

    async fn on_initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn duplicate_module_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(options_with(dir.path()).resolve());

    let instances: Vec<Box<dyn Module>> =
        vec![Box::new(NoopModule { name: "dup" }), Box::new(NoopModule { name: "dup" })];
    let err = manager.load_modules_from(instances).await.unwrap_err();
    assert!(err.to_string().contains("dup"));
}

#[tokio::test]
async fn start_modules_before_initialize_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(options_with(dir.path()).resolve());
    manager.load_modules_from(vec![Box::new(NoopModule { name: "solo" })]).await.unwrap();

    let err = manager.start_modules().await.unwrap_err();
    assert!(matches!(err, modkit::ManagerError::NotInitialized));
}
