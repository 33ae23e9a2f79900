// ABOUTME: Capability traits the container strategy needs from an engine.
// ABOUTME: Containers, images, the service network and log tails, plus their request types.

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use crate::types::{ContainerId, ImageRef, NetworkId};

/// Label set on every container and network shipwright creates.
pub const MANAGED_LABEL: &str = "shipwright.managed";
/// Label naming the service a container belongs to.
pub const SERVICE_LABEL: &str = "shipwright.service";

/// Ids and names are interchangeable wherever a `ContainerId` is taken.
#[async_trait]
pub trait ContainerOps: Send + Sync {
    async fn create_container(&self, config: &ContainerConfig)
    -> Result<ContainerId, ContainerError>;

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError>;

    async fn stop_container(&self, id: &ContainerId, timeout: Duration)
    -> Result<(), ContainerError>;

    /// `force` also removes a running container.
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError>;

    async fn container_state(&self, id: &ContainerId) -> Result<ContainerState, ContainerError>;

    async fn rename_container(&self, id: &ContainerId, new_name: &str)
    -> Result<(), ContainerError>;
}

#[async_trait]
pub trait ImageOps: Send + Sync {
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError>;

    async fn pull_image(&self, reference: &ImageRef) -> Result<(), ImageError>;
}

#[async_trait]
pub trait NetworkOps: Send + Sync {
    async fn network_exists(&self, name: &str) -> Result<bool, NetworkError>;

    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkId, NetworkError>;

    async fn remove_network(&self, id: &NetworkId) -> Result<(), NetworkError>;
}

pub type LogChunks = Pin<Box<dyn Stream<Item = Result<String, LogError>> + Send>>;

#[async_trait]
pub trait LogOps: Send + Sync {
    /// Combined stdout and stderr, limited to the last `lines` lines.
    async fn log_chunks(&self, id: &ContainerId, lines: u64) -> Result<LogChunks, LogError>;

    /// Last `lines` lines of output, oldest first.
    async fn tail_logs(&self, id: &ContainerId, lines: u64) -> Result<Vec<String>, LogError> {
        let mut chunks = self.log_chunks(id, lines).await?;
        let mut out = Vec::new();
        while let Some(chunk) = chunks.next().await {
            // One frame may carry several lines.
            out.extend(chunk?.lines().map(str::to_string));
        }
        let excess = out.len().saturating_sub(lines as usize);
        out.drain(..excess);
        Ok(out)
    }
}

/// Everything the container strategy needs from an engine.
pub trait ContainerEngine: ContainerOps + ImageOps + NetworkOps + LogOps {}

impl<T> ContainerEngine for T where T: ContainerOps + ImageOps + NetworkOps + LogOps {}

/// One service container. Containers restart unless stopped.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: ImageRef,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    /// Overrides the image CMD.
    pub command: Option<Vec<String>>,
    pub limits: Option<EngineLimits>,
    pub network: Option<String>,
    /// DNS aliases on `network`.
    pub network_aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// A bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineLimits {
    pub memory_bytes: Option<u64>,
    /// 1.0 = one core.
    pub cpus: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Exited,
    Dead,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: String,
    pub driver: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container already exists: {0}")]
    AlreadyExists(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error("container already running: {0}")]
    AlreadyRunning(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("engine error: {0}")]
    Engine(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("pull of {image} failed: {cause}")]
    PullFailed { image: String, cause: String },

    #[error("engine error: {0}")]
    Engine(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("network not found: {0}")]
    NotFound(String),

    #[error("network already exists: {0}")]
    AlreadyExists(String),

    #[error("network in use: {0}")]
    InUse(String),

    #[error("engine error: {0}")]
    Engine(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("log stream: {0}")]
    Stream(String),
}
