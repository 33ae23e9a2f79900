// ABOUTME: Activation strategies: how a service is brought up on the host.
// ABOUTME: One trait with a container implementation and a systemd binary implementation.

mod binary;
mod container;

pub use binary::BinaryStrategy;
pub use container::{ContainerStrategy, SERVICE_NETWORK};

use async_trait::async_trait;
use std::sync::Arc;

use super::installer::Requirement;
use super::rollback::{Reverser, RollbackLog};
use crate::config::{Config, StrategyKind};
use crate::host::{CommandRunner, HostError, SystemCommandRunner};
use crate::inventory::{Inventory, ServiceDescriptor};
use crate::runtime::{ContainerError, ImageError, LogError, NetworkError, RuntimeError};
use crate::types::ServiceName;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("container engine: {0}")]
    Engine(String),

    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("{service} has no {strategy} activation parameters")]
    MissingParameters {
        service: ServiceName,
        strategy: StrategyKind,
    },

    #[error("executable {0} not found and no build command declared")]
    MissingExecutable(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl From<ContainerError> for StrategyError {
    fn from(err: ContainerError) -> Self {
        StrategyError::Engine(err.to_string())
    }
}

impl From<ImageError> for StrategyError {
    fn from(err: ImageError) -> Self {
        StrategyError::Engine(err.to_string())
    }
}

impl From<NetworkError> for StrategyError {
    fn from(err: NetworkError) -> Self {
        StrategyError::Engine(err.to_string())
    }
}

impl From<LogError> for StrategyError {
    fn from(err: LogError) -> Self {
        StrategyError::Engine(err.to_string())
    }
}

impl From<RuntimeError> for StrategyError {
    fn from(err: RuntimeError) -> Self {
        StrategyError::Engine(err.to_string())
    }
}

/// Strategy-specific activation and lifecycle control.
///
/// `reverse` (from [`Reverser`]) undoes the strategy's own rollback actions.
#[async_trait]
pub trait ActivationStrategy: Reverser {
    fn kind(&self) -> StrategyKind;

    /// Host requirements the installer ensures before activation.
    fn requirements(&self) -> Vec<Requirement>;

    /// Shared resources needed before any service starts. Each undo step
    /// is recorded as soon as its forward action completes, so a failure
    /// part way still leaves the finished work reversible.
    async fn prepare(
        &self,
        config: &Config,
        inventory: &Inventory,
        log: &mut RollbackLog,
    ) -> Result<(), StrategyError>;

    /// Bring one service up and return its handle (container id or unit).
    ///
    /// The undo step goes into `log` before the host is touched, so an
    /// activation dropped by a timeout or cancellation is still reversed;
    /// reverse actions tolerate work that never happened. On an error
    /// return the strategy has removed what it created and withdrawn the
    /// step, unless that cleanup failed.
    async fn activate(
        &self,
        service: &ServiceDescriptor,
        config: &Config,
        log: &mut RollbackLog,
    ) -> Result<String, StrategyError>;

    async fn start(&self, service: &ServiceName) -> Result<(), StrategyError>;

    async fn stop(&self, service: &ServiceName) -> Result<(), StrategyError>;

    async fn restart(&self, service: &ServiceName) -> Result<(), StrategyError> {
        self.stop(service).await?;
        self.start(service).await
    }

    async fn is_running(&self, service: &ServiceName) -> Result<bool, StrategyError>;

    /// Last `lines` lines of service output, oldest first.
    async fn recent_logs(
        &self,
        service: &ServiceName,
        lines: u32,
    ) -> Result<Vec<String>, StrategyError>;
}

/// Builds the strategy for a run.
pub trait StrategyProvider: Send + Sync {
    fn strategy(&self, kind: StrategyKind) -> Arc<dyn ActivationStrategy>;
}

/// Strategies backed by the real host: the local container engine
/// (connected on first use) or systemd.
#[derive(Default)]
pub struct SystemStrategies;

impl StrategyProvider for SystemStrategies {
    fn strategy(&self, kind: StrategyKind) -> Arc<dyn ActivationStrategy> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        match kind {
            StrategyKind::Container => Arc::new(ContainerStrategy::local()),
            StrategyKind::Binary => Arc::new(BinaryStrategy::new(runner)),
        }
    }
}

/// Label of the rollback step recorded for one service's activation.
pub fn activation_label(service: &ServiceName) -> String {
    format!("activate {}", service)
}

/// Run a command and turn a non-zero exit into `StrategyError::Command`.
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &crate::host::CommandSpec,
) -> Result<String, StrategyError> {
    let output = runner.run(spec).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(StrategyError::Command {
            command: spec.to_string(),
            detail: output.failure_summary(),
        })
    }
}
