// ABOUTME: Test support utilities.
// ABOUTME: In-memory fakes for every engine seam plus config and inventory builders.

// Each test binary only uses some of these helpers, so allow dead_code.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use shipwright::config::{Config, ConfigLayer, ConfigResolver, ConfigSources, StrategyKind};
use shipwright::deploy::{
    ActivationStrategy, Requirement, Reverser, RollbackLog, RollbackStep, Seams, StrategyError,
    StrategyProvider, UndoAction, UndoError, activation_label,
};
use shipwright::events::{DeployEvent, EventSink};
use shipwright::host::{
    Capacity, CommandOutput, CommandRunner, CommandSpec, EndpointProbe, HostError, HostInspector,
};
use shipwright::inventory::{Inventory, ServiceDescriptor};
use shipwright::types::ServiceName;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("shipwright=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const GIB: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Host
// =============================================================================

/// A roomy host where every port is free unless marked busy.
pub struct FakeHost {
    pub busy_ports: HashSet<u16>,
    pub disk: Capacity,
    pub memory: Capacity,
    pub missing_commands: HashSet<String>,
    pub unreachable: HashSet<String>,
}

impl Default for FakeHost {
    fn default() -> Self {
        FakeHost {
            busy_ports: HashSet::new(),
            disk: Capacity {
                total: 100 * GIB,
                available: 80 * GIB,
            },
            memory: Capacity {
                total: 16 * GIB,
                available: 12 * GIB,
            },
            missing_commands: HashSet::new(),
            unreachable: HashSet::new(),
        }
    }
}

#[async_trait]
impl HostInspector for FakeHost {
    async fn port_available(&self, port: u16) -> bool {
        !self.busy_ports.contains(&port)
    }

    async fn disk(&self, _path: &Path) -> Result<Capacity, HostError> {
        Ok(self.disk)
    }

    async fn memory(&self) -> Result<Capacity, HostError> {
        Ok(self.memory)
    }

    async fn command_exists(&self, name: &str) -> bool {
        !self.missing_commands.contains(name)
    }

    async fn reachable(&self, target: &str, _timeout: Duration) -> bool {
        !self.unreachable.contains(target)
    }

    /// Reads the real file system; tests work in temp dirs.
    async fn file_mode(&self, path: &Path) -> Result<Option<u32>, HostError> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some(meta.permissions().mode() & 0o7777)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::Io {
                context: path.display().to_string(),
                source: e,
            }),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Simulates packages: `has X` succeeds once `install X` ran, `remove X`
/// undoes it. Every other command succeeds unless its program is listed
/// in `failing`.
#[derive(Default)]
pub struct FakeRunner {
    pub installed: Mutex<HashSet<String>>,
    pub failing: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn with_installed<I: IntoIterator<Item = &'static str>>(names: I) -> Self {
        FakeRunner {
            installed: Mutex::new(names.into_iter().map(String::from).collect()),
            ..FakeRunner::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(program))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, HostError> {
        self.calls.lock().unwrap().push(spec.to_string());
        let mut installed = self.installed.lock().unwrap();
        let target = spec.args.first().cloned().unwrap_or_default();
        let ok = match spec.program.as_str() {
            program if self.failing.contains(program) => false,
            "has" => installed.contains(&target),
            "install" => {
                installed.insert(target);
                true
            }
            "remove" => {
                installed.remove(&target);
                true
            }
            _ => true,
        };
        Ok(CommandOutput {
            code: Some(if ok { 0 } else { 1 }),
            stdout: String::new(),
            stderr: if ok { String::new() } else { "simulated failure".to_string() },
        })
    }
}

/// A requirement driven by [`FakeRunner`]'s package simulation.
pub fn requirement(name: &str) -> Requirement {
    Requirement {
        name: name.to_string(),
        probe: CommandSpec::new("has", [name]),
        install: Some(CommandSpec::new("install", [name])),
        removal: shipwright::deploy::Removal::Command(CommandSpec::new("remove", [name])),
    }
}

// =============================================================================
// HTTP probe
// =============================================================================

/// Answers every GET with `status`, or refuses when `None`.
pub struct FakeProbe {
    pub status: Option<u16>,
}

impl FakeProbe {
    pub fn ok() -> Self {
        FakeProbe { status: Some(200) }
    }

    pub fn refusing() -> Self {
        FakeProbe { status: None }
    }
}

#[async_trait]
impl EndpointProbe for FakeProbe {
    async fn get(&self, port: u16, _path: &str, _timeout: Duration) -> Result<u16, HostError> {
        self.status
            .ok_or_else(|| HostError::Http(format!("connection refused on port {}", port)))
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// Records activations and reversals in memory.
#[derive(Default)]
pub struct FakeStrategy {
    pub requirements: Vec<Requirement>,
    /// Activation of this service fails.
    pub fail_on: Option<String>,
    /// Activation of this service starts it and then never returns.
    pub hang_on: Option<String>,
    pub running: Mutex<HashSet<String>>,
    pub activated: Mutex<Vec<String>>,
    pub reversed: Mutex<Vec<String>>,
    pub logs: HashMap<String, Vec<String>>,
}

impl FakeStrategy {
    pub fn failing_on(service: &str) -> Self {
        FakeStrategy {
            fail_on: Some(service.to_string()),
            ..FakeStrategy::default()
        }
    }

    pub fn hanging_on(service: &str) -> Self {
        FakeStrategy {
            hang_on: Some(service.to_string()),
            ..FakeStrategy::default()
        }
    }

    pub fn activated(&self) -> Vec<String> {
        self.activated.lock().unwrap().clone()
    }

    pub fn reversed(&self) -> Vec<String> {
        self.reversed.lock().unwrap().clone()
    }

    pub fn running(&self) -> HashSet<String> {
        self.running.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reverser for FakeStrategy {
    async fn reverse(&self, action: &UndoAction) -> Result<(), UndoError> {
        match action {
            UndoAction::RemoveContainer { name } => {
                self.running.lock().unwrap().remove(name);
                self.reversed.lock().unwrap().push(name.clone());
                Ok(())
            }
            other => Err(UndoError(format!("unexpected action {:?}", other))),
        }
    }
}

#[async_trait]
impl ActivationStrategy for FakeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Container
    }

    fn requirements(&self) -> Vec<Requirement> {
        self.requirements.clone()
    }

    async fn prepare(
        &self,
        _config: &Config,
        _inventory: &Inventory,
        _log: &mut RollbackLog,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    async fn activate(
        &self,
        service: &ServiceDescriptor,
        _config: &Config,
        log: &mut RollbackLog,
    ) -> Result<String, StrategyError> {
        let name = service.name.to_string();
        let label = activation_label(&service.name);
        log.record(RollbackStep::new(
            label.clone(),
            UndoAction::RemoveContainer { name: name.clone() },
        ));
        if self.fail_on.as_deref() == Some(name.as_str()) {
            log.withdraw(&label);
            return Err(StrategyError::Engine(format!("{} refused to start", name)));
        }
        self.activated.lock().unwrap().push(name.clone());
        self.running.lock().unwrap().insert(name.clone());
        if self.hang_on.as_deref() == Some(name.as_str()) {
            std::future::pending::<()>().await;
        }
        Ok(format!("fake-{}", name))
    }

    async fn start(&self, service: &ServiceName) -> Result<(), StrategyError> {
        self.running.lock().unwrap().insert(service.to_string());
        Ok(())
    }

    async fn stop(&self, service: &ServiceName) -> Result<(), StrategyError> {
        self.running.lock().unwrap().remove(service.as_str());
        Ok(())
    }

    async fn is_running(&self, service: &ServiceName) -> Result<bool, StrategyError> {
        Ok(self.running.lock().unwrap().contains(service.as_str()))
    }

    async fn recent_logs(
        &self,
        service: &ServiceName,
        _lines: u32,
    ) -> Result<Vec<String>, StrategyError> {
        Ok(self.logs.get(service.as_str()).cloned().unwrap_or_default())
    }
}

/// Hands out the same fake whatever strategy is asked for.
pub struct FakeProvider(pub Arc<FakeStrategy>);

impl StrategyProvider for FakeProvider {
    fn strategy(&self, _kind: StrategyKind) -> Arc<dyn ActivationStrategy> {
        self.0.clone()
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DeployEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DeployEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &DeployEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// =============================================================================
// Fixture
// =============================================================================

/// All fakes for one test, owned together so `seams()` can borrow them.
pub struct Rig {
    pub host: FakeHost,
    pub runner: FakeRunner,
    pub probe: FakeProbe,
    pub strategy: Arc<FakeStrategy>,
    pub provider: FakeProvider,
    pub sink: RecordingSink,
}

impl Rig {
    pub fn new(strategy: FakeStrategy) -> Self {
        let strategy = Arc::new(strategy);
        Rig {
            host: FakeHost::default(),
            runner: FakeRunner::default(),
            probe: FakeProbe::ok(),
            provider: FakeProvider(strategy.clone()),
            strategy,
            sink: RecordingSink::default(),
        }
    }

    pub fn seams(&self) -> Seams<'_> {
        Seams {
            host: &self.host,
            runner: &self.runner,
            endpoint: &self.probe,
            strategies: &self.provider,
            events: &self.sink,
        }
    }
}

/// Overrides that keep every path inside `root` and health polling fast.
pub fn test_pairs(root: &Path) -> Vec<String> {
    vec![
        "domain=example.org".to_string(),
        "admin_email=ops@example.org".to_string(),
        "signing_secret=0123456789abcdef0123456789abcdef".to_string(),
        format!("data_dir={}", root.join("data").display()),
        format!("state_dir={}", root.join("state").display()),
        format!("unit_dir={}", root.join("units").display()),
        "preflight.connectivity_targets=[]".to_string(),
        "health.attempts=2".to_string(),
        "health.interval=10ms".to_string(),
        "health.probe_timeout=1s".to_string(),
    ]
}

pub fn test_sources(root: &Path, extra: &[&str]) -> ConfigSources {
    let mut pairs = test_pairs(root);
    pairs.extend(extra.iter().map(|s| s.to_string()));
    ConfigSources {
        file: None,
        overrides: ConfigLayer::from_pairs(pairs).unwrap(),
    }
}

pub fn test_config(root: &Path, extra: &[&str]) -> Config {
    ConfigResolver::resolve(&test_sources(root, extra)).unwrap()
}

/// Three services: `api` (rank 1, api port), `web` (rank 2, http + https),
/// `worker` (rank 3, no ports).
pub fn three_services() -> Inventory {
    Inventory::from_yaml(
        r#"
- name: api
  rank: 1
  ports: [api]
  probe: { kind: http, path: /health, port: api }
  activation:
    container: { image: "ghcr.io/acme/api:1.0" }
- name: web
  rank: 2
  ports: [http, https]
  probe: { kind: http, path: /, port: http }
  activation:
    container: { image: "ghcr.io/acme/web:1.0" }
- name: worker
  rank: 3
  probe: { kind: process }
  activation:
    container: { image: "ghcr.io/acme/worker:1.0" }
"#,
    )
    .unwrap()
}
