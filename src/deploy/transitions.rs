// ABOUTME: State transition methods for deployment orchestration.
// ABOUTME: Each method consumes self and returns the next state on success.

use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::Deployment;
use super::error::DeployError;
use super::executor::DeploymentExecutor;
use super::installer::DependencyInstaller;
use super::lock::DeployLock;
use super::phase::Phase;
use super::record::DeploymentRecord;
use super::rollback::{HostReverser, ReplaySummary};
use super::state::{Checked, Completed, Executed, Installed, Mutated, Resolved, RolledBack, Verified};
use crate::diagnostics::WarningKind;
use crate::events::DeployEvent;
use crate::health::{HealthVerifier, ProbeContext};
use crate::preflight::PreflightChecker;

/// Result type for transitions that may need rollback on failure.
pub type TransitionResult<'a, T, S> = Result<Deployment<'a, T>, (Deployment<'a, S>, DeployError)>;

/// Run a phase body under its time limit, aborting early on cancellation.
async fn guarded<T, F>(
    cancel: &CancellationToken,
    phase: Phase,
    limit: Duration,
    body: F,
) -> Result<T, DeployError>
where
    F: Future<Output = Result<T, DeployError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(DeployError::Cancelled { phase }),
        outcome = tokio::time::timeout(limit, body) => match outcome {
            Ok(result) => result,
            Err(_) => Err(DeployError::PhaseTimeout { phase }),
        },
    }
}

// =============================================================================
// Resolved -> Checked
// =============================================================================

impl<'a> Deployment<'a, Resolved> {
    /// Take the deploy lock and run every pre-flight check.
    ///
    /// Nothing on the host is changed, so a failure here leaves the
    /// deployment in `Resolved`, which has no rollback.
    ///
    /// # Errors
    ///
    /// Returns `DeployError::Locked` when another run holds the lock, or
    /// `DeployError::PreflightFailed` carrying every failed check.
    pub async fn preflight(mut self, force_lock: bool) -> TransitionResult<'a, Checked, Resolved> {
        if self.cancel.is_cancelled() {
            return Err((
                self,
                DeployError::Cancelled {
                    phase: Phase::PreflightChecking,
                },
            ));
        }

        match DeployLock::acquire(&self.config.paths.state_dir, "deploy", force_lock) {
            Ok(lock) => self.lock = Some(lock),
            Err(e) => return Err((self, e)),
        }

        let checker = PreflightChecker::new(self.seams.host);
        match checker.run(&self.config, &self.inventory).await {
            Ok(report) => {
                self.seams
                    .events
                    .emit(&DeployEvent::ModeDetected { mode: report.mode });
                self.mode = Some(report.mode);
                self.existing = report.existing;
                Ok(self.transition(Checked))
            }
            Err(failures) => {
                for failure in &failures {
                    self.seams.events.emit(&DeployEvent::CheckFailed {
                        check: failure.check.to_string(),
                        reason: failure.reason.clone(),
                    });
                }
                Err((self, DeployError::PreflightFailed { failures }))
            }
        }
    }
}

// =============================================================================
// Checked -> Installed
// =============================================================================

impl<'a> Deployment<'a, Checked> {
    /// Ensure the data dir and the strategy's host requirements.
    pub async fn install_dependencies(mut self) -> TransitionResult<'a, Installed, Checked> {
        let requirements = self.strategy.requirements();
        let installer = DependencyInstaller::new(self.seams.runner, self.seams.events);
        let outcome = guarded(
            &self.cancel,
            Phase::InstallingDependencies,
            self.config.timeouts.install,
            installer.install(&requirements, &self.config.paths.data_dir, &mut self.log),
        )
        .await;

        match outcome {
            Ok(summary) => {
                self.installed = summary;
                Ok(self.transition(Installed))
            }
            Err(e) => Err((self, e)),
        }
    }
}

// =============================================================================
// Installed -> Executed
// =============================================================================

impl<'a> Deployment<'a, Installed> {
    /// Write the environment file, prepare shared resources and activate
    /// every service in rank order.
    pub async fn execute(mut self) -> TransitionResult<'a, Executed, Installed> {
        let executor = DeploymentExecutor::new(&*self.strategy, self.seams.events, &self.cancel);
        let outcome = guarded(
            &self.cancel,
            Phase::Executing,
            self.config.timeouts.execute,
            executor.execute(&self.config, &self.inventory, &mut self.log),
        )
        .await;

        match outcome {
            Ok(services) => {
                self.services = services;
                Ok(self.transition(Executed))
            }
            Err(e) => Err((self, e)),
        }
    }
}

// =============================================================================
// Executed -> Verified
// =============================================================================

impl<'a> Deployment<'a, Executed> {
    /// Poll health until the readiness threshold is met or attempts run out.
    pub async fn verify_health(mut self) -> TransitionResult<'a, Verified, Executed> {
        let ctx = ProbeContext {
            config: &self.config,
            inventory: &self.inventory,
            strategy: &*self.strategy,
            host: self.seams.host,
            endpoint: self.seams.endpoint,
        };
        let outcome = HealthVerifier::new(ctx)
            .verify(&self.cancel, self.seams.events)
            .await;

        match outcome {
            Ok(verified) => {
                for sample in &verified.warnings {
                    self.diagnostics.warn(
                        WarningKind::AdvisoryHealth,
                        format!("{}: {}", sample.dimension, sample.detail),
                    );
                }
                self.health = Some(verified);
                Ok(self.transition(Verified))
            }
            Err(e) => Err((self, e)),
        }
    }
}

// =============================================================================
// Verified -> Completed
// =============================================================================

impl<'a> Deployment<'a, Verified> {
    /// Persist the deployment record. The undo journal moves into the
    /// record, so the run's rollback log is empty afterwards.
    pub async fn finish(mut self) -> TransitionResult<'a, Completed, Verified> {
        let record = DeploymentRecord {
            strategy: self.config.strategy,
            domain: self.config.domain.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: gethostname::gethostname().to_string_lossy().into_owned(),
            deployed_at: Utc::now(),
            services: self.services.clone(),
            journal: self.log.steps().to_vec(),
            previous: None,
        }
        .with_previous(self.existing.clone());

        match record.save(&self.config.paths.state_dir) {
            Ok(()) => {
                tracing::info!(
                    services = record.services.len(),
                    steps = record.journal.len(),
                    "deployment recorded"
                );
                let log = std::mem::take(&mut self.log);
                log.discard();
                Ok(self.transition(Completed))
            }
            Err(e) => Err((self, e)),
        }
    }
}

// =============================================================================
// Rollback (any state after pre-flight)
// =============================================================================

impl<'a, S: Mutated> Deployment<'a, S> {
    /// Replay the rollback log newest first. Failed steps do not stop the
    /// replay; they come back as manual interventions in the summary.
    pub async fn roll_back(mut self) -> (Deployment<'a, RolledBack>, ReplaySummary) {
        tracing::warn!(steps = self.log.len(), "rolling back");
        let reverser = HostReverser::new(self.seams.runner, &*self.strategy);
        let summary = self.log.replay(&reverser).await;

        let reversed = summary
            .replayed
            .iter()
            .filter(|label| !summary.manual.iter().any(|m| &&m.label == label));
        for label in reversed {
            self.seams
                .events
                .emit(&DeployEvent::StepReversed { label: label.clone() });
        }
        for manual in &summary.manual {
            self.seams.events.emit(&DeployEvent::ManualIntervention {
                label: manual.label.clone(),
                error: manual.error.clone(),
            });
        }

        self.services.clear();
        (self.transition(RolledBack), summary)
    }
}
