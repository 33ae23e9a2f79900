// ABOUTME: Error taxonomy for deployment runs.
// ABOUTME: One variant per failure class the report distinguishes.

use chrono::{DateTime, Utc};

use super::phase::Phase;
use super::rollback::ManualIntervention;
use crate::config::ConfigError;
use crate::inventory::InventoryError;
use crate::preflight::PreflightFailure;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("pre-flight checks failed: {}", summarize(.failures))]
    PreflightFailed { failures: Vec<PreflightFailure> },

    #[error("failed to install {name}: {cause}")]
    DependencyInstallFailed { name: String, cause: String },

    #[error("failed to activate {service}: {cause}")]
    ExecutionFailed { service: String, cause: String },

    #[error("services not healthy after {attempts} attempts (last score {last_score:.2})")]
    HealthCheckTimeout { last_score: f64, attempts: u32 },

    #[error("rollback incomplete: {} step(s) need manual intervention", .steps.len())]
    RollbackIncomplete { steps: Vec<ManualIntervention> },

    #[error("no deployment recorded on this host")]
    NotDeployed,

    #[error("cancelled during {phase}")]
    Cancelled { phase: Phase },

    #[error("{phase} exceeded its time limit")]
    PhaseTimeout { phase: Phase },

    #[error("deploy lock held by {holder} (pid {pid}) since {since}")]
    Locked {
        holder: String,
        pid: u32,
        since: DateTime<Utc>,
    },

    #[error("deploy lock error: {0}")]
    Lock(String),

    #[error("deployment record error: {0}")]
    Record(String),
}

fn summarize(failures: &[PreflightFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stable, machine-readable error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployErrorKind {
    ConfigInvalid,
    PreflightFailed,
    DependencyInstallFailed,
    ExecutionFailed,
    HealthCheckTimeout,
    RollbackIncomplete,
    NotDeployed,
    Cancelled,
    PhaseTimeout,
    Locked,
    Record,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::ConfigInvalid(_) => DeployErrorKind::ConfigInvalid,
            DeployError::PreflightFailed { .. } => DeployErrorKind::PreflightFailed,
            DeployError::DependencyInstallFailed { .. } => DeployErrorKind::DependencyInstallFailed,
            DeployError::ExecutionFailed { .. } => DeployErrorKind::ExecutionFailed,
            DeployError::HealthCheckTimeout { .. } => DeployErrorKind::HealthCheckTimeout,
            DeployError::RollbackIncomplete { .. } => DeployErrorKind::RollbackIncomplete,
            DeployError::NotDeployed => DeployErrorKind::NotDeployed,
            DeployError::Cancelled { .. } => DeployErrorKind::Cancelled,
            DeployError::PhaseTimeout { .. } => DeployErrorKind::PhaseTimeout,
            DeployError::Locked { .. } | DeployError::Lock(_) => DeployErrorKind::Locked,
            DeployError::Record(_) => DeployErrorKind::Record,
        }
    }

    pub(crate) fn execution(service: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        DeployError::ExecutionFailed {
            service: service.into(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn record(message: impl Into<String>) -> Self {
        DeployError::Record(message.into())
    }
}

impl From<ConfigError> for DeployError {
    fn from(err: ConfigError) -> Self {
        DeployError::ConfigInvalid(err.to_string())
    }
}

impl From<InventoryError> for DeployError {
    fn from(err: InventoryError) -> Self {
        DeployError::ConfigInvalid(err.to_string())
    }
}
