// ABOUTME: Pre-flight checks run before anything on the host is touched.
// ABOUTME: Independent, read-only checks evaluated concurrently; every failure is reported.

use futures::future::{BoxFuture, FutureExt, join_all};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::config::{Config, MIN_SECRET_LEN, StrategyKind};
use crate::deploy::DeploymentRecord;
use crate::host::HostInspector;
use crate::inventory::Inventory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Config,
    Ports,
    Disk,
    Memory,
    Commands,
    Connectivity,
    ExistingDeployment,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Config => "config",
            CheckKind::Ports => "ports",
            CheckKind::Disk => "disk",
            CheckKind::Memory => "memory",
            CheckKind::Commands => "commands",
            CheckKind::Connectivity => "connectivity",
            CheckKind::ExistingDeployment => "existing_deployment",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed check, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightFailure {
    pub check: CheckKind,
    pub reason: String,
}

impl PreflightFailure {
    pub fn new(check: CheckKind, reason: impl Into<String>) -> Self {
        PreflightFailure {
            check,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PreflightFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check, self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    Fresh,
    Upgrade,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Fresh => write!(f, "fresh"),
            InstallMode::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// Result of a clean pre-flight run.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub mode: InstallMode,
    pub existing: Option<DeploymentRecord>,
}

/// External commands a strategy shells out to.
pub fn strategy_commands(strategy: StrategyKind) -> &'static [&'static str] {
    match strategy {
        StrategyKind::Container => &[],
        StrategyKind::Binary => &["systemctl", "journalctl"],
    }
}

type Failures = Vec<PreflightFailure>;

pub struct PreflightChecker<'a> {
    host: &'a dyn HostInspector,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(host: &'a dyn HostInspector) -> Self {
        PreflightChecker { host }
    }

    /// Run every check; `Err` carries all failures in check order.
    pub async fn run(
        &self,
        config: &Config,
        inventory: &Inventory,
    ) -> Result<PreflightReport, Vec<PreflightFailure>> {
        let (existing, mut failures) = detect_existing(config);
        let exempt: HashSet<u16> = existing
            .iter()
            .flat_map(|r| r.owned_ports())
            .collect();

        let checks: Vec<BoxFuture<'_, Failures>> = vec![
            async { check_config(config) }.boxed(),
            self.check_ports(config, inventory, &exempt).boxed(),
            self.check_disk(config).boxed(),
            self.check_memory(config).boxed(),
            self.check_commands(config).boxed(),
            self.check_connectivity(config).boxed(),
        ];
        for result in join_all(checks).await {
            failures.extend(result);
        }
        failures.sort_by_key(|f| f.check as u8);

        if !failures.is_empty() {
            for failure in &failures {
                tracing::debug!(check = %failure.check, reason = %failure.reason, "pre-flight check failed");
            }
            return Err(failures);
        }

        let mode = if existing.is_some() {
            InstallMode::Upgrade
        } else {
            InstallMode::Fresh
        };
        tracing::info!(%mode, "pre-flight checks passed");
        Ok(PreflightReport { mode, existing })
    }

    async fn check_ports(
        &self,
        config: &Config,
        inventory: &Inventory,
        exempt: &HashSet<u16>,
    ) -> Failures {
        let mut failures = Vec::new();
        for (service, port) in inventory.designated_ports(&config.ports) {
            if exempt.contains(&port) {
                continue;
            }
            if !self.host.port_available(port).await {
                failures.push(PreflightFailure::new(
                    CheckKind::Ports,
                    format!("port {} needed by {} is already in use", port, service),
                ));
            }
        }
        failures
    }

    async fn check_disk(&self, config: &Config) -> Failures {
        let dir = &config.paths.data_dir;
        let required = config.preflight.min_disk;
        match self.host.disk(dir).await {
            Ok(capacity) if capacity.available >= required.as_bytes() => Vec::new(),
            Ok(capacity) => vec![PreflightFailure::new(
                CheckKind::Disk,
                format!(
                    "{} free at {}, need {}",
                    crate::config::ByteSize::bytes(capacity.available),
                    dir.display(),
                    required
                ),
            )],
            Err(e) => vec![PreflightFailure::new(CheckKind::Disk, e.to_string())],
        }
    }

    async fn check_memory(&self, config: &Config) -> Failures {
        let required = config.preflight.min_memory;
        match self.host.memory().await {
            Ok(capacity) if capacity.available >= required.as_bytes() => Vec::new(),
            Ok(capacity) => vec![PreflightFailure::new(
                CheckKind::Memory,
                format!(
                    "{} memory available, need {}",
                    crate::config::ByteSize::bytes(capacity.available),
                    required
                ),
            )],
            Err(e) => vec![PreflightFailure::new(CheckKind::Memory, e.to_string())],
        }
    }

    async fn check_commands(&self, config: &Config) -> Failures {
        let mut wanted: Vec<&str> = config
            .preflight
            .required_commands
            .iter()
            .map(String::as_str)
            .collect();
        wanted.extend(strategy_commands(config.strategy));
        let mut seen = HashSet::new();
        wanted.retain(|c| seen.insert(*c));

        let mut failures = Vec::new();
        for command in wanted {
            if !self.host.command_exists(command).await {
                failures.push(PreflightFailure::new(
                    CheckKind::Commands,
                    format!("required command not found: {}", command),
                ));
            }
        }
        failures
    }

    async fn check_connectivity(&self, config: &Config) -> Failures {
        let targets = &config.preflight.connectivity_targets;
        if targets.is_empty() {
            return Vec::new();
        }
        let timeout = config.preflight.connect_timeout;
        let probes = targets.iter().map(|t| self.host.reachable(t, timeout));
        if join_all(probes).await.into_iter().any(|ok| ok) {
            Vec::new()
        } else {
            vec![PreflightFailure::new(
                CheckKind::Connectivity,
                format!("none of {} reachable", targets.join(", ")),
            )]
        }
    }
}

fn check_config(config: &Config) -> Failures {
    let mut failures = Vec::new();
    if config.signing_secret.len() < MIN_SECRET_LEN {
        failures.push(PreflightFailure::new(
            CheckKind::Config,
            format!("signing secret shorter than {} characters", MIN_SECRET_LEN),
        ));
    }
    if config.tls && config.ports.https.is_none() {
        failures.push(PreflightFailure::new(
            CheckKind::Config,
            "tls is enabled but the https port is disabled",
        ));
    }
    if !is_domain_shaped(&config.domain) {
        failures.push(PreflightFailure::new(
            CheckKind::Config,
            format!("domain {:?} is not a valid host name", config.domain),
        ));
    }
    failures
}

/// Dot-separated labels of letters, digits and inner hyphens; `localhost`
/// is accepted for single-host trials.
fn is_domain_shaped(domain: &str) -> bool {
    if domain == "localhost" {
        return true;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn detect_existing(config: &Config) -> (Option<DeploymentRecord>, Failures) {
    match DeploymentRecord::load(&config.paths.state_dir) {
        Ok(Some(record)) if record.strategy != config.strategy => (
            None,
            vec![PreflightFailure::new(
                CheckKind::ExistingDeployment,
                format!(
                    "existing deployment uses the {} strategy; roll it back before switching to {}",
                    record.strategy, config.strategy
                ),
            )],
        ),
        Ok(record) => (record, Vec::new()),
        Err(e) => (
            None,
            vec![PreflightFailure::new(CheckKind::ExistingDeployment, e.to_string())],
        ),
    }
}
