// ABOUTME: Configuration snapshot and the layered resolver that builds it.
// ABOUTME: Defaults < file < overrides, merged field by field, validated once.

mod health;
mod init;
mod layer;
mod resolve;
mod resources;
mod secret;

pub use health::HealthPolicy;
pub use init::init_config;
pub use layer::{
    BackupLayer, ConfigLayer, ENV_PREFIX, HealthLayer, PortsLayer, PreflightLayer,
    ResourcesLayer, TimeoutsLayer,
};
pub use resolve::{ConfigResolver, ConfigSources};
pub use resources::{ByteSize, CpuLimit, ResourceLimits};
pub use secret::{MIN_SECRET_LEN, Secret};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "shipwright.yml";
pub const CONFIG_FILENAME_ALT: &str = "shipwright.yaml";

/// Name of the environment file rendered for services under the data dir.
pub const SERVICE_ENV_FILE: &str = "shipwright.env";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

/// Activation strategy, chosen per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Container,
    Binary,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Container => write!(f, "container"),
            StrategyKind::Binary => write!(f, "binary"),
        }
    }
}

/// Names of the configurable ports, referenced by the service inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKey {
    Http,
    Https,
    Api,
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKey::Http => write!(f, "http"),
            PortKey::Https => write!(f, "https"),
            PortKey::Api => write!(f, "api"),
        }
    }
}

/// Exposed ports. `None` means the port is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub http: Option<u16>,
    pub https: Option<u16>,
    pub api: Option<u16>,
}

impl Ports {
    pub fn get(&self, key: PortKey) -> Option<u16> {
        match key {
            PortKey::Http => self.http,
            PortKey::Https => self.https,
            PortKey::Api => self.api,
        }
    }

    pub fn enabled(&self) -> Vec<(PortKey, u16)> {
        [PortKey::Http, PortKey::Https, PortKey::Api]
            .into_iter()
            .filter_map(|key| self.get(key).map(|port| (key, port)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupPolicy {
    pub enabled: bool,
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Service data and the rendered environment file.
    pub data_dir: PathBuf,
    /// shipwright's own bookkeeping: deployment record and lock.
    pub state_dir: PathBuf,
    /// Where the binary strategy writes systemd units.
    pub unit_dir: PathBuf,
}

impl Paths {
    pub fn env_file(&self) -> PathBuf {
        self.data_dir.join(SERVICE_ENV_FILE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreflightPolicy {
    pub min_disk: ByteSize,
    pub min_memory: ByteSize,
    pub required_commands: Vec<String>,
    pub connectivity_targets: Vec<String>,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub install: Duration,
    pub execute: Duration,
}

/// Immutable configuration snapshot for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub domain: String,
    pub admin_email: String,
    pub ports: Ports,
    pub tls: bool,
    pub resources: ResourceLimits,
    pub backup: BackupPolicy,
    pub signing_secret: Secret,
    pub strategy: StrategyKind,
    pub paths: Paths,
    pub health: HealthPolicy,
    pub preflight: PreflightPolicy,
    pub timeouts: PhaseTimeouts,
}

impl Config {
    /// Environment handed to every service, by container env or unit
    /// `EnvironmentFile=`.
    pub fn service_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("SHIPWRIGHT_DOMAIN".to_string(), self.domain.clone());
        env.insert("SHIPWRIGHT_ADMIN_EMAIL".to_string(), self.admin_email.clone());
        for (key, port) in self.ports.enabled() {
            env.insert(
                format!("SHIPWRIGHT_{}_PORT", key.to_string().to_ascii_uppercase()),
                port.to_string(),
            );
        }
        env.insert("SHIPWRIGHT_TLS".to_string(), self.tls.to_string());
        env.insert(
            "SHIPWRIGHT_BACKUP_ENABLED".to_string(),
            self.backup.enabled.to_string(),
        );
        env.insert(
            "SHIPWRIGHT_BACKUP_RETENTION_DAYS".to_string(),
            self.backup.retention_days.to_string(),
        );
        env.insert(
            "SHIPWRIGHT_SIGNING_SECRET".to_string(),
            self.signing_secret.expose().to_string(),
        );
        env.insert(
            "SHIPWRIGHT_DATA_DIR".to_string(),
            self.paths.data_dir.display().to_string(),
        );
        env
    }

    /// Render `service_env` in `KEY=value` file form.
    pub fn render_env_file(&self) -> String {
        self.service_env()
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect()
    }

    /// Find a config file in `dir` using the conventional names.
    pub fn discover_file(dir: &Path) -> Option<PathBuf> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }
}
