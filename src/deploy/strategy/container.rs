// ABOUTME: Container activation through the engine API (Docker or Podman).
// ABOUTME: Upgrades keep the old container aside as `<name>-previous` until rollback or the next run.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{ActivationStrategy, StrategyError, activation_label};
use crate::config::{Config, StrategyKind};
use crate::deploy::installer::{Removal, Requirement};
use crate::deploy::rollback::{Reverser, RollbackLog, RollbackStep, UndoAction, UndoError};
use crate::host::CommandSpec;
use crate::inventory::{ContainerSpec, Inventory, ServiceDescriptor};
use crate::runtime::{
    ContainerConfig, ContainerEngine, ContainerError, ContainerState, EngineLimits, MANAGED_LABEL,
    NetworkConfig, NetworkError, PortMapping, SERVICE_LABEL, VolumeMount, connect_local,
};
use crate::types::{ContainerId, NetworkId, ServiceName};

/// Network every service container joins; services reach each other by name.
pub const SERVICE_NETWORK: &str = "shipwright";

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ContainerStrategy {
    engine: OnceCell<Arc<dyn ContainerEngine>>,
}

impl ContainerStrategy {
    /// Strategy that connects to the local engine on first use.
    pub fn local() -> Self {
        ContainerStrategy {
            engine: OnceCell::new(),
        }
    }

    pub fn with_engine(engine: Arc<dyn ContainerEngine>) -> Self {
        ContainerStrategy {
            engine: OnceCell::new_with(Some(engine)),
        }
    }

    async fn engine(&self) -> Result<&Arc<dyn ContainerEngine>, StrategyError> {
        self.engine
            .get_or_try_init(|| async {
                let engine = connect_local().await?;
                tracing::debug!(engine = %engine.kind(), "connected to container engine");
                Ok::<Arc<dyn ContainerEngine>, StrategyError>(Arc::new(engine))
            })
            .await
    }

    async fn ensure_network(&self, log: &mut RollbackLog) -> Result<(), StrategyError> {
        let engine = self.engine().await?;
        if engine.network_exists(SERVICE_NETWORK).await? {
            return Ok(());
        }

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        let config = NetworkConfig {
            name: SERVICE_NETWORK.to_string(),
            driver: "bridge".to_string(),
            labels,
        };
        match engine.create_network(&config).await {
            Ok(_) => {
                log.record(RollbackStep::new(
                    format!("create network {}", SERVICE_NETWORK),
                    UndoAction::RemoveNetwork {
                        name: SERVICE_NETWORK.to_string(),
                    },
                ));
                Ok(())
            }
            // Created between check and create.
            Err(NetworkError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        let engine = self.engine().await.map_err(|e| ContainerError::Engine(e.to_string()))?;
        match engine.container_state(&ContainerId::new(name)).await {
            Ok(_) => Ok(true),
            Err(ContainerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn start_if_stopped(&self, name: &str) -> Result<(), ContainerError> {
        let engine = self.engine().await.map_err(|e| ContainerError::Engine(e.to_string()))?;
        match engine.start_container(&ContainerId::new(name)).await {
            Ok(()) | Err(ContainerError::AlreadyRunning(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stop and remove, treating an absent container as done.
    async fn discard(&self, name: &str) -> Result<(), ContainerError> {
        let engine = self.engine().await.map_err(|e| ContainerError::Engine(e.to_string()))?;
        let id = ContainerId::new(name);
        match engine.stop_container(&id, STOP_TIMEOUT).await {
            Ok(()) | Err(ContainerError::NotRunning(_)) | Err(ContainerError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match engine.remove_container(&id, true).await {
            Ok(()) | Err(ContainerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Undo an upgrade at whatever point it stopped. Until the rename
    /// happened the old container still holds `name` and only needs to
    /// run again; afterwards the new one is discarded and the old one
    /// moved back.
    async fn restore_previous(&self, name: &str, previous: &str) -> Result<(), ContainerError> {
        if self.exists(previous).await? {
            self.discard(name).await?;
            let engine = self.engine().await.map_err(|e| ContainerError::Engine(e.to_string()))?;
            engine.rename_container(&ContainerId::new(previous), name).await?;
        }
        self.start_if_stopped(name).await
    }

    /// Move the running container aside as `previous`, then start the new one.
    async fn replace_and_start(
        &self,
        previous: &str,
        config: &ContainerConfig,
    ) -> Result<ContainerId, StrategyError> {
        let engine = self.engine().await?;
        let current = ContainerId::new(&config.name);
        match engine.stop_container(&current, STOP_TIMEOUT).await {
            Ok(()) | Err(ContainerError::NotRunning(_)) => {}
            Err(e) => return Err(e.into()),
        }
        engine.rename_container(&current, previous).await?;
        self.create_and_start(config).await
    }

    async fn create_and_start(&self, config: &ContainerConfig) -> Result<ContainerId, StrategyError> {
        let engine = self.engine().await?;
        let id = engine.create_container(config).await?;
        if let Err(e) = engine.start_container(&id).await {
            let _ = engine.remove_container(&id, true).await;
            return Err(e.into());
        }
        Ok(id)
    }
}

/// Engine config for one service.
pub(crate) fn container_config(
    service: &ServiceDescriptor,
    spec: &ContainerSpec,
    config: &Config,
) -> ContainerConfig {
    let mut env: HashMap<String, String> = config.service_env().into_iter().collect();
    env.insert("SHIPWRIGHT_SERVICE".to_string(), service.name.to_string());
    env.extend(spec.env.clone());

    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(SERVICE_LABEL.to_string(), service.name.to_string());

    let ports = service
        .resolved_ports(&config.ports)
        .into_iter()
        .map(|port| PortMapping {
            host_port: port,
            container_port: port,
        })
        .collect();

    let volumes = spec
        .volumes
        .iter()
        .map(|v| VolumeMount {
            source: volume_source(&config.paths.data_dir, &v.source),
            target: v.target.clone(),
            read_only: v.read_only,
        })
        .collect();

    let limits = &config.resources;
    let engine_limits = (limits.memory.is_some() || limits.cpus.is_some()).then(|| EngineLimits {
        memory_bytes: limits.memory.map(|m| m.as_bytes()),
        cpus: limits.cpus.map(|c| c.cores()),
    });

    ContainerConfig {
        name: service.name.container_name(),
        image: spec.image.clone(),
        env,
        labels,
        ports,
        volumes,
        command: spec.command.clone(),
        limits: engine_limits,
        network: Some(SERVICE_NETWORK.to_string()),
        network_aliases: vec![service.name.to_string()],
    }
}

fn volume_source(data_dir: &Path, source: &str) -> String {
    if Path::new(source).is_absolute() {
        source.to_string()
    } else {
        data_dir.join(source).display().to_string()
    }
}

fn spec_for<'a>(service: &'a ServiceDescriptor) -> Result<&'a ContainerSpec, StrategyError> {
    service
        .activation
        .container
        .as_ref()
        .ok_or_else(|| StrategyError::MissingParameters {
            service: service.name.clone(),
            strategy: StrategyKind::Container,
        })
}

#[async_trait]
impl Reverser for ContainerStrategy {
    async fn reverse(&self, action: &UndoAction) -> Result<(), UndoError> {
        match action {
            UndoAction::RemoveContainer { name } => self.discard(name).await.map_err(UndoError::new),
            UndoAction::RestoreContainer { name, previous } => self
                .restore_previous(name, previous)
                .await
                .map_err(UndoError::new),
            UndoAction::RemoveNetwork { name } => {
                let engine = self.engine().await.map_err(UndoError::new)?;
                match engine.remove_network(&NetworkId::new(name.clone())).await {
                    Ok(()) | Err(NetworkError::NotFound(_)) => Ok(()),
                    Err(e) => Err(UndoError::new(e)),
                }
            }
            other => Err(UndoError(format!(
                "container strategy cannot reverse {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl ActivationStrategy for ContainerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Container
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![
            Requirement {
                name: "container-engine".to_string(),
                probe: CommandSpec::shell(
                    "command -v podman >/dev/null 2>&1 || command -v docker >/dev/null 2>&1",
                ),
                install: Some(CommandSpec::shell(
                    "if command -v apt-get >/dev/null 2>&1; then apt-get install -y podman; \
                     else dnf install -y podman; fi",
                )),
                removal: Removal::Keep,
            },
            Requirement {
                name: "engine-socket".to_string(),
                probe: CommandSpec::shell(
                    "[ -n \"$CONTAINER_HOST$DOCKER_HOST\" ] || [ -S /run/podman/podman.sock ] \
                     || [ -S /var/run/docker.sock ] || [ -S \"/run/user/$(id -u)/podman/podman.sock\" ]",
                ),
                install: Some(CommandSpec::new(
                    "systemctl",
                    ["enable", "--now", "podman.socket"],
                )),
                removal: Removal::Command(CommandSpec::new(
                    "systemctl",
                    ["disable", "--now", "podman.socket"],
                )),
            },
        ]
    }

    async fn prepare(
        &self,
        config: &Config,
        inventory: &Inventory,
        log: &mut RollbackLog,
    ) -> Result<(), StrategyError> {
        self.ensure_network(log).await?;

        let engine = self.engine().await?;
        for service in inventory.iter() {
            let spec = spec_for(service)?;

            for volume in &spec.volumes {
                let source = volume_source(&config.paths.data_dir, &volume.source);
                let path = Path::new(&source);
                if !path.exists() {
                    tokio::fs::create_dir_all(path)
                        .await
                        .map_err(|e| crate::host::HostError::io(format!("create {}", source), e))?;
                    log.record(RollbackStep::new(
                        format!("create volume dir {}", source),
                        UndoAction::RemoveDir {
                            path: path.to_path_buf(),
                        },
                    ));
                }
            }

            if !spec.image.is_pinned() || !engine.image_exists(&spec.image).await? {
                tracing::info!(image = %spec.image, "pulling image");
                engine.pull_image(&spec.image).await?;
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
        let spec = spec_for(service)?;
        let name = service.name.container_name();
        let previous = service.name.previous_container_name();

        let upgrading = self.exists(&name).await?;
        if upgrading {
            // A leftover from an earlier upgrade; the record no longer refers to it.
            self.discard(&previous).await?;
        }

        let label = activation_label(&service.name);
        let action = if upgrading {
            UndoAction::RestoreContainer {
                name: name.clone(),
                previous: previous.clone(),
            }
        } else {
            UndoAction::RemoveContainer { name: name.clone() }
        };
        log.record(RollbackStep::new(label.clone(), action));

        let container = container_config(service, spec, config);
        let started = if upgrading {
            self.replace_and_start(&previous, &container).await
        } else {
            self.create_and_start(&container).await
        };

        match started {
            Ok(id) => {
                tracing::debug!(service = %service.name, container = %id, "container started");
                Ok(id.to_string())
            }
            Err(e) => {
                let cleanup = if upgrading {
                    self.restore_previous(&name, &previous).await
                } else {
                    self.discard(&name).await
                };
                match cleanup {
                    Ok(()) => {
                        log.withdraw(&label);
                    }
                    Err(cleanup) => {
                        tracing::warn!(container = %name, error = %cleanup, "cleanup after failed start");
                    }
                }
                Err(e)
            }
        }
    }

    async fn start(&self, service: &ServiceName) -> Result<(), StrategyError> {
        let engine = self.engine().await?;
        match engine
            .start_container(&ContainerId::new(service.container_name()))
            .await
        {
            Ok(()) | Err(ContainerError::AlreadyRunning(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self, service: &ServiceName) -> Result<(), StrategyError> {
        let engine = self.engine().await?;
        match engine
            .stop_container(&ContainerId::new(service.container_name()), STOP_TIMEOUT)
            .await
        {
            Ok(()) | Err(ContainerError::NotRunning(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_running(&self, service: &ServiceName) -> Result<bool, StrategyError> {
        let engine = self.engine().await?;
        match engine
            .container_state(&ContainerId::new(service.container_name()))
            .await
        {
            Ok(state) => Ok(state == ContainerState::Running),
            Err(ContainerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn recent_logs(
        &self,
        service: &ServiceName,
        lines: u32,
    ) -> Result<Vec<String>, StrategyError> {
        let engine = self.engine().await?;
        Ok(engine
            .tail_logs(&ContainerId::new(service.container_name()), u64::from(lines))
            .await?)
    }
}
