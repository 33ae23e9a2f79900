// ABOUTME: Lifecycle control of an existing deployment: start, stop, restart, logs, status.
// ABOUTME: Always uses the strategy recorded at deploy time, not the configured one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::error::DeployError;
use super::record::DeploymentRecord;
use super::strategy::{ActivationStrategy, StrategyProvider};
use crate::config::{Config, StrategyKind};
use crate::health::{HealthScore, HealthVerifier, ProbeContext};
use crate::host::{EndpointProbe, HostInspector};
use crate::inventory::{Inventory, ServiceDescriptor};
use crate::types::ServiceName;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: ServiceName,
    pub rank: u32,
    pub handle: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub strategy: StrategyKind,
    pub domain: String,
    pub version: String,
    pub deployed_at: DateTime<Utc>,
    pub services: Vec<ServiceStatus>,
    pub health: HealthScore,
}

pub struct ServiceController<'a> {
    config: Config,
    inventory: Inventory,
    record: DeploymentRecord,
    strategy: Arc<dyn ActivationStrategy>,
    host: &'a dyn HostInspector,
    endpoint: &'a dyn EndpointProbe,
}

impl<'a> ServiceController<'a> {
    /// Open the deployment recorded under the configured state dir.
    ///
    /// # Errors
    ///
    /// `NotDeployed` when no record exists.
    pub fn open(
        config: Config,
        inventory: Inventory,
        strategies: &dyn StrategyProvider,
        host: &'a dyn HostInspector,
        endpoint: &'a dyn EndpointProbe,
    ) -> Result<Self, DeployError> {
        let record = DeploymentRecord::require(&config.paths.state_dir)?;
        let strategy = strategies.strategy(record.strategy);
        Ok(ServiceController {
            config,
            inventory,
            record,
            strategy,
            host,
            endpoint,
        })
    }

    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    /// Start the named services (all when empty) in rank order.
    pub async fn start(&self, names: &[ServiceName]) -> Result<Vec<ServiceName>, DeployError> {
        let targets = self.targets(names)?;
        for service in &targets {
            tracing::info!(service = %service.name, "starting");
            self.strategy
                .start(&service.name)
                .await
                .map_err(|e| DeployError::execution(service.name.as_str(), e))?;
        }
        Ok(targets.into_iter().map(|s| s.name.clone()).collect())
    }

    /// Stop the named services (all when empty), highest rank first.
    pub async fn stop(&self, names: &[ServiceName]) -> Result<Vec<ServiceName>, DeployError> {
        let targets = self.targets(names)?;
        for service in targets.iter().rev() {
            tracing::info!(service = %service.name, "stopping");
            self.strategy
                .stop(&service.name)
                .await
                .map_err(|e| DeployError::execution(service.name.as_str(), e))?;
        }
        Ok(targets.into_iter().rev().map(|s| s.name.clone()).collect())
    }

    pub async fn restart(&self, names: &[ServiceName]) -> Result<Vec<ServiceName>, DeployError> {
        let targets = self.targets(names)?;
        for service in &targets {
            tracing::info!(service = %service.name, "restarting");
            self.strategy
                .restart(&service.name)
                .await
                .map_err(|e| DeployError::execution(service.name.as_str(), e))?;
        }
        Ok(targets.into_iter().map(|s| s.name.clone()).collect())
    }

    pub async fn logs(&self, name: &ServiceName, lines: u32) -> Result<Vec<String>, DeployError> {
        self.targets(std::slice::from_ref(name))?;
        self.strategy
            .recent_logs(name, lines)
            .await
            .map_err(|e| DeployError::execution(name.as_str(), e))
    }

    /// One health pass plus the running state of every recorded service.
    pub async fn status(&self) -> StatusSnapshot {
        let mut services = Vec::with_capacity(self.record.services.len());
        for deployed in &self.record.services {
            let (running, error) = match self.strategy.is_running(&deployed.name).await {
                Ok(running) => (running, None),
                Err(e) => (false, Some(e.to_string())),
            };
            services.push(ServiceStatus {
                name: deployed.name.clone(),
                rank: deployed.rank,
                handle: deployed.handle.clone(),
                running,
                error,
            });
        }

        let health = HealthVerifier::new(ProbeContext {
            config: &self.config,
            inventory: &self.inventory,
            strategy: &*self.strategy,
            host: self.host,
            endpoint: self.endpoint,
        })
        .evaluate()
        .await;

        StatusSnapshot {
            strategy: self.record.strategy,
            domain: self.record.domain.clone(),
            version: self.record.version.clone(),
            deployed_at: self.record.deployed_at,
            services,
            health,
        }
    }

    fn targets(&self, names: &[ServiceName]) -> Result<Vec<&ServiceDescriptor>, DeployError> {
        if let Some(unknown) = names.iter().find(|n| self.inventory.get(n).is_none()) {
            return Err(DeployError::ConfigInvalid(format!("unknown service: {}", unknown)));
        }
        if names.is_empty() {
            Ok(self.inventory.iter().collect())
        } else {
            Ok(self.inventory.select(names))
        }
    }
}
