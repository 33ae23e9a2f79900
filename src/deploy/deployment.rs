// ABOUTME: Generic deployment struct parameterized by state marker.
// ABOUTME: Carries the run's seams, snapshot, rollback log and the facts gathered so far.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::installer::InstallSummary;
use super::lock::DeployLock;
use super::record::{DeployedService, DeploymentRecord};
use super::rollback::RollbackLog;
use super::state::Resolved;
use super::strategy::{ActivationStrategy, StrategyProvider};
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::events::EventSink;
use crate::health::VerifiedHealth;
use crate::host::{CommandRunner, EndpointProbe, HostInspector};
use crate::inventory::Inventory;
use crate::preflight::InstallMode;

/// Everything the engine touches the outside world through.
#[derive(Clone, Copy)]
pub struct Seams<'a> {
    pub host: &'a dyn HostInspector,
    pub runner: &'a dyn CommandRunner,
    pub endpoint: &'a dyn EndpointProbe,
    pub strategies: &'a dyn StrategyProvider,
    pub events: &'a dyn EventSink,
}

/// A deployment in progress, parameterized by its current state.
///
/// Transitions consume the deployment. A failed transition hands the
/// deployment back in its previous state together with the error, so the
/// caller can still roll it back.
pub struct Deployment<'a, S> {
    pub(crate) seams: Seams<'a>,
    pub(crate) cancel: CancellationToken,
    pub(crate) config: Config,
    pub(crate) inventory: Inventory,
    pub(crate) strategy: Arc<dyn ActivationStrategy>,
    pub(crate) log: RollbackLog,
    pub(crate) lock: Option<DeployLock>,
    pub(crate) mode: Option<InstallMode>,
    pub(crate) existing: Option<DeploymentRecord>,
    pub(crate) installed: InstallSummary,
    pub(crate) services: Vec<DeployedService>,
    pub(crate) health: Option<VerifiedHealth>,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) state: S,
}

impl<'a> Deployment<'a, Resolved> {
    pub fn new(
        seams: Seams<'a>,
        cancel: CancellationToken,
        config: Config,
        inventory: Inventory,
    ) -> Self {
        let strategy = seams.strategies.strategy(config.strategy);
        Deployment {
            seams,
            cancel,
            config,
            inventory,
            strategy,
            log: RollbackLog::new(),
            lock: None,
            mode: None,
            existing: None,
            installed: InstallSummary::default(),
            services: Vec::new(),
            health: None,
            diagnostics: Diagnostics::default(),
            state: Resolved,
        }
    }
}

impl<'a, S> Deployment<'a, S> {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Fresh or upgrade, known once pre-flight passed.
    pub fn mode(&self) -> Option<InstallMode> {
        self.mode
    }

    pub fn installed(&self) -> &InstallSummary {
        &self.installed
    }

    /// Services activated by this run, in rank order.
    pub fn services(&self) -> &[DeployedService] {
        &self.services
    }

    pub fn health(&self) -> Option<&VerifiedHealth> {
        self.health.as_ref()
    }

    /// Undo steps recorded so far.
    pub fn log(&self) -> &RollbackLog {
        &self.log
    }

    /// Hand over the lock and the collected warnings.
    pub(crate) fn into_parts(self) -> (Option<DeployLock>, Diagnostics) {
        (self.lock, self.diagnostics)
    }

    /// Internal helper to transition to a new state.
    pub(crate) fn transition<T>(self, state: T) -> Deployment<'a, T> {
        Deployment {
            seams: self.seams,
            cancel: self.cancel,
            config: self.config,
            inventory: self.inventory,
            strategy: self.strategy,
            log: self.log,
            lock: self.lock,
            mode: self.mode,
            existing: self.existing,
            installed: self.installed,
            services: self.services,
            health: self.health,
            diagnostics: self.diagnostics,
            state,
        }
    }
}
