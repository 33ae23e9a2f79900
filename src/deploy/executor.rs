// ABOUTME: Deployment execution: environment file, shared resources, then services by rank.
// ABOUTME: Undo steps reach the rollback log before the next action begins.

use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::record::DeployedService;
use super::rollback::{RollbackLog, RollbackStep, UndoAction};
use super::strategy::ActivationStrategy;
use super::{DeployError, Phase};
use crate::config::Config;
use crate::events::{DeployEvent, EventSink};
use crate::inventory::Inventory;

const ENV_FILE_MODE: u32 = 0o600;

pub struct DeploymentExecutor<'a> {
    strategy: &'a dyn ActivationStrategy,
    events: &'a dyn EventSink,
    cancel: &'a CancellationToken,
}

impl<'a> DeploymentExecutor<'a> {
    pub fn new(
        strategy: &'a dyn ActivationStrategy,
        events: &'a dyn EventSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        DeploymentExecutor {
            strategy,
            events,
            cancel,
        }
    }

    /// Activate every service in ascending rank, stopping at the first failure.
    pub async fn execute(
        &self,
        config: &Config,
        inventory: &Inventory,
        log: &mut RollbackLog,
    ) -> Result<Vec<DeployedService>, DeployError> {
        if let Some(step) = write_env_file(&config.paths.env_file(), &config.render_env_file())
            .map_err(|e| DeployError::execution("environment file", e))?
        {
            log.record(step);
        }

        self.strategy
            .prepare(config, inventory, log)
            .await
            .map_err(|e| DeployError::execution("shared resources", e))?;

        let mut deployed = Vec::with_capacity(inventory.len());
        for service in inventory.iter() {
            if self.cancel.is_cancelled() {
                return Err(DeployError::Cancelled {
                    phase: Phase::Executing,
                });
            }

            tracing::info!(service = %service.name, rank = service.rank, "activating");
            let handle = self
                .strategy
                .activate(service, config, log)
                .await
                .map_err(|e| DeployError::execution(service.name.as_str(), e))?;

            self.events.emit(&DeployEvent::ServiceActivated {
                service: service.name.clone(),
                rank: service.rank,
                handle: handle.clone(),
            });
            deployed.push(DeployedService {
                name: service.name.clone(),
                rank: service.rank,
                handle,
                ports: service.resolved_ports(&config.ports),
            });
        }
        Ok(deployed)
    }
}

/// Write `contents` with mode 0600. Returns the undo step, or `None` when
/// the file already had exactly this content and mode.
pub(crate) fn write_env_file(
    path: &Path,
    contents: &str,
) -> Result<Option<RollbackStep>, std::io::Error> {
    let label = format!("write {}", path.display());
    let existing = match std::fs::read_to_string(path) {
        Ok(previous) => {
            let mode = std::fs::metadata(path)?.permissions().mode() & 0o7777;
            Some((previous, mode))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    match existing {
        Some((previous, mode)) if previous == contents && mode == ENV_FILE_MODE => {
            tracing::debug!(path = %path.display(), "environment file unchanged");
            Ok(None)
        }
        Some((previous, mode)) => {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(ENV_FILE_MODE))?;
            std::fs::write(path, contents)?;
            Ok(Some(RollbackStep::new(
                label,
                UndoAction::RestoreFile {
                    path: path.to_path_buf(),
                    contents: previous,
                    mode,
                },
            )))
        }
        None => {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(ENV_FILE_MODE)
                .open(path)?;
            file.write_all(contents.as_bytes())?;
            Ok(Some(RollbackStep::new(
                label,
                UndoAction::RemoveFile {
                    path: path.to_path_buf(),
                },
            )))
        }
    }
}
