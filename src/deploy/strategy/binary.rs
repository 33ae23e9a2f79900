// ABOUTME: Native activation: services run as systemd units from prebuilt or built executables.
// ABOUTME: Renders one unit per service with resource limits and the shared environment file.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use super::{ActivationStrategy, StrategyError, activation_label, run_checked};
use crate::config::{Config, StrategyKind};
use crate::deploy::installer::{Removal, Requirement};
use crate::deploy::rollback::{Reverser, RollbackLog, RollbackStep, UndoAction, UndoError};
use crate::host::{CommandRunner, CommandSpec, HostError};
use crate::inventory::{BinarySpec, Inventory, ServiceDescriptor};
use crate::types::ServiceName;

pub struct BinaryStrategy {
    runner: Arc<dyn CommandRunner>,
}

impl BinaryStrategy {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        BinaryStrategy { runner }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<String, StrategyError> {
        run_checked(self.runner.as_ref(), &CommandSpec::new("systemctl", args.iter().copied())).await
    }

    /// Locate the executable, building it when missing and a build command
    /// exists. A build records the removal of its output first and returns
    /// that step's label.
    async fn ensure_executable(
        &self,
        service: &ServiceName,
        spec: &BinarySpec,
        log: &mut RollbackLog,
    ) -> Result<Option<String>, StrategyError> {
        let exe = spec.executable_path();
        if exe.exists() {
            return Ok(None);
        }
        let Some(build) = &spec.build else {
            return Err(StrategyError::MissingExecutable(exe.display().to_string()));
        };

        let label = format!("build {}", exe.display());
        log.record(RollbackStep::new(
            label.clone(),
            UndoAction::RemoveFile { path: exe.clone() },
        ));

        tracing::info!(%service, "building executable");
        let mut command = CommandSpec::shell(build.clone());
        if let Some(dir) = &spec.workdir {
            command = command.in_dir(dir);
        }
        let built = match run_checked(self.runner.as_ref(), &command).await {
            Ok(_) if exe.exists() => Ok(()),
            Ok(_) => Err(StrategyError::MissingExecutable(exe.display().to_string())),
            Err(e) => Err(e),
        };
        match built {
            Ok(()) => Ok(Some(label)),
            Err(e) => {
                if !exe.exists() {
                    log.withdraw(&label);
                }
                Err(e)
            }
        }
    }

    /// Write the unit and enable it. The undo step is recorded before the
    /// unit file is touched.
    async fn install_unit(
        &self,
        service: &ServiceDescriptor,
        spec: &BinarySpec,
        config: &Config,
        log: &mut RollbackLog,
    ) -> Result<String, StrategyError> {
        let unit = service.name.unit_name();
        let unit_file = config.paths.unit_dir.join(&unit);
        let previous = read_if_present(&unit_file).await?;

        let label = activation_label(&service.name);
        let action = match &previous {
            Some(previous_contents) => UndoAction::RestoreUnit {
                unit: unit.clone(),
                unit_file: unit_file.clone(),
                previous_contents: previous_contents.clone(),
            },
            None => UndoAction::DisableUnit {
                unit: unit.clone(),
                unit_file: unit_file.clone(),
            },
        };
        log.record(RollbackStep::new(label.clone(), action));

        let rendered = render_unit(service, spec, config);
        let enabled = self
            .enable_unit(&unit, &unit_file, &rendered, previous.is_some())
            .await;
        if let Err(e) = enabled {
            if self.revert_unit(&unit, &unit_file, previous.as_deref()).await {
                log.withdraw(&label);
            }
            return Err(e);
        }

        tracing::debug!(service = %service.name, %unit, "unit enabled");
        Ok(unit)
    }

    async fn enable_unit(
        &self,
        unit: &str,
        unit_file: &Path,
        rendered: &str,
        upgrading: bool,
    ) -> Result<(), StrategyError> {
        write_unit(unit_file, rendered).await?;
        self.systemctl(&["daemon-reload"]).await?;
        self.systemctl(&["enable", "--now", unit]).await?;
        if upgrading {
            self.systemctl(&["restart", unit]).await?;
        }
        Ok(())
    }

    /// Undo a unit write after a failed enable or restart. Returns whether
    /// the host is back where it was.
    async fn revert_unit(&self, unit: &str, unit_file: &Path, previous: Option<&str>) -> bool {
        let result = match previous {
            Some(contents) => write_unit(unit_file, contents).await,
            None => {
                let _ = self.systemctl(&["disable", "--now", unit]).await;
                remove_if_present(unit_file).await
            }
        };
        let mut reverted = true;
        if let Err(e) = result {
            tracing::warn!(unit, error = %e, "failed to revert unit file");
            reverted = false;
        }
        if let Err(e) = self.systemctl(&["daemon-reload"]).await {
            tracing::warn!(error = %e, "daemon-reload failed during cleanup");
            reverted = false;
        }
        reverted
    }
}

/// systemd unit for one service.
pub(crate) fn render_unit(service: &ServiceDescriptor, spec: &BinarySpec, config: &Config) -> String {
    let mut exec = spec.executable_path().display().to_string();
    for arg in &spec.args {
        exec.push(' ');
        exec.push_str(arg);
    }
    let workdir = spec
        .workdir
        .clone()
        .unwrap_or_else(|| config.paths.data_dir.clone());

    let mut unit = format!(
        "[Unit]\n\
         Description=shipwright {name}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={exec}\n\
         WorkingDirectory={workdir}\n\
         EnvironmentFile={env_file}\n\
         Environment=SHIPWRIGHT_SERVICE={name}\n\
         Restart=on-failure\n\
         RestartSec=2\n",
        name = service.name,
        exec = exec,
        workdir = workdir.display(),
        env_file = config.paths.env_file().display(),
    );
    if let Some(memory) = config.resources.memory {
        unit.push_str(&format!("MemoryMax={}\n", memory.as_bytes()));
    }
    if let Some(cpus) = config.resources.cpus {
        unit.push_str(&format!("CPUQuota={}\n", cpus.systemd_quota()));
    }
    unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    unit
}

async fn write_unit(path: &Path, contents: &str) -> Result<(), HostError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| HostError::io(format!("write {}", path.display()), e))?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .map_err(|e| HostError::io(format!("chmod {}", path.display()), e))
}

async fn remove_if_present(path: &Path) -> Result<(), HostError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HostError::io(format!("remove {}", path.display()), e)),
    }
}

async fn read_if_present(path: &Path) -> Result<Option<String>, HostError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HostError::io(format!("read {}", path.display()), e)),
    }
}

#[async_trait]
impl Reverser for BinaryStrategy {
    async fn reverse(&self, action: &UndoAction) -> Result<(), UndoError> {
        match action {
            UndoAction::DisableUnit { unit, unit_file } => {
                // Never written, so never enabled.
                if !tokio::fs::try_exists(unit_file).await.unwrap_or(true) {
                    return Ok(());
                }
                self.systemctl(&["disable", "--now", unit])
                    .await
                    .map_err(UndoError::new)?;
                remove_if_present(unit_file).await.map_err(UndoError::new)?;
                self.systemctl(&["daemon-reload"]).await.map_err(UndoError::new)?;
                Ok(())
            }
            UndoAction::RestoreUnit {
                unit,
                unit_file,
                previous_contents,
            } => {
                write_unit(unit_file, previous_contents)
                    .await
                    .map_err(UndoError::new)?;
                self.systemctl(&["daemon-reload"]).await.map_err(UndoError::new)?;
                self.systemctl(&["restart", unit]).await.map_err(UndoError::new)?;
                Ok(())
            }
            other => Err(UndoError(format!("binary strategy cannot reverse {:?}", other))),
        }
    }
}

#[async_trait]
impl ActivationStrategy for BinaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Binary
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![Requirement {
            name: "systemd".to_string(),
            probe: CommandSpec::new("systemctl", ["--version"]),
            install: None,
            removal: Removal::Keep,
        }]
    }

    async fn prepare(
        &self,
        config: &Config,
        inventory: &Inventory,
        log: &mut RollbackLog,
    ) -> Result<(), StrategyError> {
        let unit_dir = &config.paths.unit_dir;
        if !unit_dir.exists() {
            tokio::fs::create_dir_all(unit_dir)
                .await
                .map_err(|e| HostError::io(format!("create {}", unit_dir.display()), e))?;
            log.record(RollbackStep::new(
                format!("create unit dir {}", unit_dir.display()),
                UndoAction::RemoveDir {
                    path: unit_dir.clone(),
                },
            ));
        }

        for service in inventory.iter() {
            if service.activation.binary.is_none() {
                return Err(StrategyError::MissingParameters {
                    service: service.name.clone(),
                    strategy: StrategyKind::Binary,
                });
            }
        }
        Ok(())
    }

    async fn activate(
        &self,
        service: &ServiceDescriptor,
        config: &Config,
        log: &mut RollbackLog,
    ) -> Result<String, StrategyError> {
        let spec = service
            .activation
            .binary
            .as_ref()
            .ok_or_else(|| StrategyError::MissingParameters {
                service: service.name.clone(),
                strategy: StrategyKind::Binary,
            })?;
        let built = self.ensure_executable(&service.name, spec, log).await?;

        match self.install_unit(service, spec, config, log).await {
            Ok(unit) => Ok(unit),
            Err(e) => {
                if let Some(label) = built {
                    match remove_if_present(&spec.executable_path()).await {
                        Ok(()) => {
                            log.withdraw(&label);
                        }
                        Err(cleanup) => {
                            tracing::warn!(error = %cleanup, "failed to remove built executable");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn start(&self, service: &ServiceName) -> Result<(), StrategyError> {
        self.systemctl(&["start", &service.unit_name()]).await.map(|_| ())
    }

    async fn stop(&self, service: &ServiceName) -> Result<(), StrategyError> {
        self.systemctl(&["stop", &service.unit_name()]).await.map(|_| ())
    }

    async fn restart(&self, service: &ServiceName) -> Result<(), StrategyError> {
        self.systemctl(&["restart", &service.unit_name()]).await.map(|_| ())
    }

    async fn is_running(&self, service: &ServiceName) -> Result<bool, StrategyError> {
        let unit = service.unit_name();
        let spec = CommandSpec::new("systemctl", ["is-active", "--quiet", unit.as_str()]);
        Ok(self.runner.run(&spec).await?.success())
    }

    async fn recent_logs(
        &self,
        service: &ServiceName,
        lines: u32,
    ) -> Result<Vec<String>, StrategyError> {
        let spec = CommandSpec::new(
            "journalctl",
            [
                "-u".to_string(),
                service.unit_name(),
                "-n".to_string(),
                lines.to_string(),
                "--no-pager".to_string(),
                "-o".to_string(),
                "cat".to_string(),
            ],
        );
        let stdout = run_checked(self.runner.as_ref(), &spec).await?;
        Ok(stdout.lines().map(str::to_string).collect())
    }
}
