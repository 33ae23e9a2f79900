// ABOUTME: Persisted record of the current deployment, written after a successful run.
// ABOUTME: Its presence means "deployed"; it carries the undo journal for later teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use super::DeployError;
use super::rollback::RollbackStep;
use crate::config::StrategyKind;
use crate::types::ServiceName;

const RECORD_FILE: &str = "deployment.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedService {
    pub name: ServiceName,
    pub rank: u32,
    /// Container id or systemd unit name.
    pub handle: String,
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub strategy: StrategyKind,
    pub domain: String,
    /// shipwright version that performed the deployment.
    pub version: String,
    pub host: String,
    pub deployed_at: DateTime<Utc>,
    /// Rank order.
    pub services: Vec<DeployedService>,
    /// Reverse actions of the run, oldest first.
    #[serde(default)]
    pub journal: Vec<RollbackStep>,
    /// Record this deployment replaced; restored on rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Box<DeploymentRecord>>,
}

impl DeploymentRecord {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(RECORD_FILE)
    }

    /// Read the record, `None` when no deployment exists.
    pub fn load(state_dir: &Path) -> Result<Option<Self>, DeployError> {
        let path = Self::path(state_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DeployError::record(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| DeployError::record(format!("corrupt record {}: {}", path.display(), e)))
    }

    /// Load, or fail with `NotDeployed`.
    pub fn require(state_dir: &Path) -> Result<Self, DeployError> {
        Self::load(state_dir)?.ok_or(DeployError::NotDeployed)
    }

    /// Write atomically with mode 0600. The journal may carry previous
    /// env file contents.
    pub fn save(&self, state_dir: &Path) -> Result<(), DeployError> {
        std::fs::create_dir_all(state_dir).map_err(|e| {
            DeployError::record(format!("failed to create {}: {}", state_dir.display(), e))
        })?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DeployError::record(format!("failed to serialize record: {}", e)))?;

        let path = Self::path(state_dir);
        let tmp = path.with_extension("json.tmp");
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)
            .map_err(|e| DeployError::record(format!("failed to write {}: {}", tmp.display(), e)))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| DeployError::record(format!("failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            DeployError::record(format!("failed to replace {}: {}", path.display(), e))
        })
    }

    /// Delete the record; `false` when there was none.
    pub fn remove(state_dir: &Path) -> Result<bool, DeployError> {
        let path = Self::path(state_dir);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DeployError::record(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Keep only one generation of history.
    pub fn with_previous(mut self, previous: Option<DeploymentRecord>) -> Self {
        self.previous = previous.map(|mut p| {
            p.previous = None;
            Box::new(p)
        });
        self
    }

    pub fn service(&self, name: &ServiceName) -> Option<&DeployedService> {
        self.services.iter().find(|s| &s.name == name)
    }

    /// Every host port owned by the recorded services.
    pub fn owned_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.services.iter().flat_map(|s| s.ports.iter().copied())
    }
}
