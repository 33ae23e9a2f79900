// ABOUTME: Engine client over the Docker-compatible API using bollard.
// ABOUTME: Maps engine HTTP statuses onto the typed errors the strategy matches on.

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, EndpointSettings, HostConfig, Mount,
    MountTypeEnum, NetworkCreateRequest, NetworkingConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, InspectNetworkOptions,
    LogsOptions, RemoveContainerOptions, RenameContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use super::detection::{EngineKind, EngineSocket, detect_socket};
use super::engine::{
    ContainerConfig, ContainerError, ContainerOps, ContainerState, ImageError, ImageOps, LogChunks,
    LogError, LogOps, NetworkConfig, NetworkError, NetworkOps,
};
use super::error::RuntimeError;
use crate::types::{ContainerId, ImageRef, NetworkId};

/// Seconds bollard waits on a single API call; image pulls can be slow.
const API_TIMEOUT_SECS: u64 = 300;

/// `(status, message)` of an engine error response.
fn status_of(e: &BollardError) -> Option<(u16, String)> {
    match e {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => Some((*status_code, message.clone())),
        _ => None,
    }
}

/// Map an engine error for a container call; `on_304` names what
/// "not modified" means for this call.
fn container_error(
    e: BollardError,
    on_304: Option<fn(String) -> ContainerError>,
) -> ContainerError {
    match (status_of(&e), on_304) {
        (Some((404, message)), _) => ContainerError::NotFound(message),
        (Some((409, message)), _) => ContainerError::AlreadyExists(message),
        (Some((304, message)), Some(wrap)) => wrap(message),
        _ => ContainerError::Engine(e.to_string()),
    }
}

fn network_error(e: BollardError) -> NetworkError {
    match status_of(&e) {
        Some((404, message)) => NetworkError::NotFound(message),
        Some((409, message)) => NetworkError::AlreadyExists(message),
        Some((403, message)) => NetworkError::InUse(message),
        _ => NetworkError::Engine(e.to_string()),
    }
}

/// Client for one engine socket.
pub struct BollardEngine {
    client: Docker,
    kind: EngineKind,
}

impl BollardEngine {
    pub fn connect(socket: &EngineSocket) -> Result<Self, RuntimeError> {
        let client =
            Docker::connect_with_unix(&socket.path, API_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|e| RuntimeError::Connection {
                    engine: socket.kind.to_string(),
                    socket: socket.path.clone(),
                    message: e.to_string(),
                })?;
        Ok(BollardEngine {
            client,
            kind: socket.kind,
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }
}

/// Detect the local engine, connect and check that it answers.
pub async fn connect_local() -> Result<BollardEngine, RuntimeError> {
    let socket = detect_socket()?;
    tracing::debug!(engine = %socket.kind, socket = %socket.path, "connecting to container engine");
    let engine = BollardEngine::connect(&socket)?;
    engine
        .client
        .ping()
        .await
        .map_err(|e| RuntimeError::Connection {
            engine: socket.kind.to_string(),
            socket: socket.path.clone(),
            message: e.to_string(),
        })?;
    Ok(engine)
}

fn host_config(config: &ContainerConfig) -> HostConfig {
    let mut host = HostConfig {
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            maximum_retry_count: None,
        }),
        network_mode: config.network.clone(),
        ..Default::default()
    };

    if let Some(limits) = config.limits {
        host.memory = limits.memory_bytes.map(|m| m as i64);
        host.nano_cpus = limits.cpus.map(|c| (c * 1_000_000_000.0) as i64);
    }

    if !config.volumes.is_empty() {
        host.mounts = Some(
            config
                .volumes
                .iter()
                .map(|v| Mount {
                    source: Some(v.source.clone()),
                    target: Some(v.target.clone()),
                    typ: Some(MountTypeEnum::BIND),
                    read_only: Some(v.read_only),
                    ..Default::default()
                })
                .collect(),
        );
    }

    if !config.ports.is_empty() {
        host.port_bindings = Some(
            config
                .ports
                .iter()
                .map(|p| {
                    (
                        format!("{}/tcp", p.container_port),
                        Some(vec![PortBinding {
                            host_ip: None,
                            host_port: Some(p.host_port.to_string()),
                        }]),
                    )
                })
                .collect(),
        );
    }
    host
}

fn create_body(config: &ContainerConfig) -> ContainerCreateBody {
    let env: Vec<String> = config
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    let exposed: Vec<String> = config
        .ports
        .iter()
        .map(|p| format!("{}/tcp", p.container_port))
        .collect();
    let networking_config = config
        .network
        .as_ref()
        .filter(|_| !config.network_aliases.is_empty())
        .map(|network| NetworkingConfig {
            endpoints_config: Some(HashMap::from([(
                network.clone(),
                EndpointSettings {
                    aliases: Some(config.network_aliases.clone()),
                    ..Default::default()
                },
            )])),
        });

    ContainerCreateBody {
        image: Some(config.image.to_string()),
        env: (!env.is_empty()).then_some(env),
        labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
        cmd: config.command.clone(),
        exposed_ports: (!exposed.is_empty()).then_some(exposed),
        host_config: Some(host_config(config)),
        networking_config,
        ..Default::default()
    }
}

#[async_trait]
impl ContainerOps for BollardEngine {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let opts = CreateContainerOptions {
            name: Some(config.name.clone()),
            ..Default::default()
        };
        let response = self
            .client
            .create_container(Some(opts), create_body(config))
            .await
            .map_err(|e| match status_of(&e) {
                // On create, 404 means the image is missing.
                Some((404, message)) => ContainerError::ImageNotFound(message),
                _ => container_error(e, None),
            })?;
        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.client
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(|e| container_error(e, Some(ContainerError::AlreadyRunning)))
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let opts = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            signal: None,
        };
        self.client
            .stop_container(id.as_str(), Some(opts))
            .await
            .map_err(|e| container_error(e, Some(ContainerError::NotRunning)))
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(|e| container_error(e, None))
    }

    async fn container_state(&self, id: &ContainerId) -> Result<ContainerState, ContainerError> {
        let details = self
            .client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| container_error(e, None))?;
        let status = details.state.and_then(|s| s.status);
        Ok(match status {
            Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
            Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
            Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
            Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
            _ => ContainerState::Exited,
        })
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError> {
        let opts = RenameContainerOptions {
            name: new_name.to_string(),
        };
        self.client
            .rename_container(id.as_str(), opts)
            .await
            .map_err(|e| container_error(e, None))
    }
}

#[async_trait]
impl ImageOps for BollardEngine {
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError> {
        match self.client.inspect_image(&reference.to_string()).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(status_of(&e), Some((404, _))) => Ok(false),
            Err(e) => Err(ImageError::Engine(format!("inspect {}: {}", reference, e))),
        }
    }

    async fn pull_image(&self, reference: &ImageRef) -> Result<(), ImageError> {
        let image = reference.to_string();
        let opts = CreateImageOptions {
            from_image: Some(image.clone()),
            ..Default::default()
        };
        // Progress updates arrive as a stream; drain it.
        let mut progress = self.client.create_image(Some(opts), None, None);
        while let Some(update) = progress.next().await {
            update.map_err(|e| ImageError::PullFailed {
                image: image.clone(),
                cause: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkOps for BollardEngine {
    async fn network_exists(&self, name: &str) -> Result<bool, NetworkError> {
        match self
            .client
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match network_error(e) {
                NetworkError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkId, NetworkError> {
        let request = NetworkCreateRequest {
            name: config.name.clone(),
            driver: Some(config.driver.clone()),
            labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
            ..Default::default()
        };
        let response = self
            .client
            .create_network(request)
            .await
            .map_err(network_error)?;
        Ok(NetworkId::new(response.id))
    }

    async fn remove_network(&self, id: &NetworkId) -> Result<(), NetworkError> {
        self.client
            .remove_network(id.as_str())
            .await
            .map_err(network_error)
    }
}

#[async_trait]
impl LogOps for BollardEngine {
    async fn log_chunks(&self, id: &ContainerId, lines: u64) -> Result<LogChunks, LogError> {
        let opts = LogsOptions {
            stdout: true,
            stderr: true,
            tail: lines.to_string(),
            ..Default::default()
        };
        let chunks = self.client.logs(id.as_str(), Some(opts)).map(|frame| {
            frame
                .map(|output| String::from_utf8_lossy(&output.into_bytes()).into_owned())
                .map_err(|e| match status_of(&e) {
                    Some((404, message)) => LogError::ContainerNotFound(message),
                    _ => LogError::Stream(e.to_string()),
                })
        });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EngineLimits, PortMapping, VolumeMount};

    fn config() -> ContainerConfig {
        ContainerConfig {
            name: "shipwright-console".to_string(),
            image: ImageRef::parse("ghcr.io/acme/console:1.0").unwrap(),
            env: HashMap::from([("SHIPWRIGHT_DOMAIN".to_string(), "example.org".to_string())]),
            labels: HashMap::new(),
            ports: vec![PortMapping {
                host_port: 3000,
                container_port: 3000,
            }],
            volumes: vec![VolumeMount {
                source: "/srv/shipwright/console".to_string(),
                target: "/data".to_string(),
                read_only: true,
            }],
            command: None,
            limits: Some(EngineLimits {
                memory_bytes: Some(512 * 1024 * 1024),
                cpus: Some(1.5),
            }),
            network: Some("shipwright".to_string()),
            network_aliases: vec!["console".to_string()],
        }
    }

    #[test]
    fn host_config_carries_limits_ports_and_mounts() {
        let hc = host_config(&config());
        assert_eq!(hc.memory, Some(512 * 1024 * 1024));
        assert_eq!(hc.nano_cpus, Some(1_500_000_000));
        assert_eq!(hc.network_mode.as_deref(), Some("shipwright"));
        let bindings = hc.port_bindings.unwrap();
        let binding = bindings["3000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("3000"));
        assert_eq!(hc.mounts.unwrap()[0].read_only, Some(true));
    }

    #[test]
    fn create_body_joins_the_network_under_its_alias() {
        let body = create_body(&config());
        assert_eq!(body.env, Some(vec!["SHIPWRIGHT_DOMAIN=example.org".to_string()]));
        assert!(body.labels.is_none());
        let endpoints = body.networking_config.unwrap().endpoints_config.unwrap();
        assert_eq!(
            endpoints["shipwright"].aliases,
            Some(vec!["console".to_string()])
        );
    }

    #[test]
    fn maps_engine_statuses() {
        let status = |code: u16| BollardError::DockerResponseServerError {
            status_code: code,
            message: "engine says no".to_string(),
        };
        assert!(matches!(
            container_error(status(409), None),
            ContainerError::AlreadyExists(_)
        ));
        assert!(matches!(
            container_error(status(404), None),
            ContainerError::NotFound(_)
        ));
        assert!(matches!(
            container_error(status(304), Some(ContainerError::NotRunning)),
            ContainerError::NotRunning(_)
        ));
        assert!(matches!(
            container_error(status(304), None),
            ContainerError::Engine(_)
        ));
        assert!(matches!(network_error(status(403)), NetworkError::InUse(_)));
    }
}
