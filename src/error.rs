// ABOUTME: Application-wide error types for shipwright.
// ABOUTME: Uses thiserror for ergonomic error handling; maps errors to process exit codes.

use thiserror::Error;

use crate::config::ConfigError;
use crate::deploy::{DeployError, Phase};
use crate::inventory::InventoryError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// The run ended in `Failed`; details are in the printed report.
    #[error("deployment failed during {phase}")]
    DeployFailed { phase: Phase, restored: bool },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 2: bad input. 3: failed, host restored. 4: host needs manual
    /// attention. 5: nothing deployed. 6: another run holds the lock.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Inventory(_) => 2,
            Error::DeployFailed { restored: true, .. } => 3,
            Error::DeployFailed { restored: false, .. } => 4,
            Error::Deploy(e) => match e {
                DeployError::ConfigInvalid(_) => 2,
                DeployError::RollbackIncomplete { .. } => 4,
                DeployError::NotDeployed => 5,
                DeployError::Locked { .. } | DeployError::Lock(_) => 6,
                _ => 1,
            },
            Error::Io(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
