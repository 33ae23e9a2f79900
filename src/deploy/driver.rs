// ABOUTME: Drives a deployment through its phases and turns the outcome into a report.
// ABOUTME: Also tears down the recorded deployment on an explicit rollback request.

use chrono::Utc;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::deployment::{Deployment, Seams};
use super::error::DeployError;
use super::lock::DeployLock;
use super::phase::Phase;
use super::record::DeploymentRecord;
use super::report::{DeploymentReport, ReportedError, RollbackSummary, Timeline};
use super::rollback::{HostReverser, RollbackLog, RollbackStep};
use super::state::Mutated;
use crate::config::{Config, ConfigResolver, ConfigSources};
use crate::diagnostics::{Diagnostics, WarningKind};
use crate::events::DeployEvent;
use crate::inventory::Inventory;

pub struct Driver<'a> {
    seams: Seams<'a>,
    cancel: CancellationToken,
}

impl<'a> Driver<'a> {
    pub fn new(seams: Seams<'a>, cancel: CancellationToken) -> Self {
        Driver { seams, cancel }
    }

    /// Run one deployment to a terminal state. Never returns an error: every
    /// failure ends up in the report, after rollback where one is needed.
    pub async fn deploy(
        &self,
        sources: &ConfigSources,
        inventory: Inventory,
        force_lock: bool,
    ) -> DeploymentReport {
        let mut report = DeploymentReport::new(Utc::now());
        let mut timeline = Timeline::new(self.seams.events);

        timeline.begin(Phase::Resolving);
        let config = match resolve(sources, &inventory) {
            Ok(config) => config,
            Err(e) => {
                if let Some(phase) = timeline.fail(&e) {
                    report.fail(phase, &e);
                }
                timeline.close(&mut report);
                return report;
            }
        };
        timeline.succeed();
        report.strategy = Some(config.strategy);
        let resolved = Deployment::new(self.seams, self.cancel.clone(), config, inventory);

        timeline.begin(Phase::PreflightChecking);
        let checked = match resolved.preflight(force_lock).await {
            Ok(d) => d,
            Err((d, e)) => {
                if let Some(phase) = timeline.fail(&e) {
                    report.fail(phase, &e);
                }
                return conclude(report, timeline, d.into_parts());
            }
        };
        timeline.succeed();
        report.install_mode = checked.mode();

        timeline.begin(Phase::InstallingDependencies);
        let installed = match checked.install_dependencies().await {
            Ok(d) => d,
            Err((d, e)) => return abort(report, timeline, d, e).await,
        };
        timeline.succeed();
        report.installed = installed.installed().installed.clone();

        timeline.begin(Phase::Executing);
        let executed = match installed.execute().await {
            Ok(d) => d,
            Err((d, e)) => return abort(report, timeline, d, e).await,
        };
        timeline.succeed();

        timeline.begin(Phase::VerifyingHealth);
        let verified = match executed.verify_health().await {
            Ok(d) => d,
            Err((d, e)) => return abort(report, timeline, d, e).await,
        };
        let completed = match verified.finish().await {
            Ok(d) => d,
            Err((d, e)) => return abort(report, timeline, d, e).await,
        };
        timeline.succeed();

        report.outcome = Phase::Succeeded;
        report.services = completed.services().to_vec();
        if let Some(health) = completed.health() {
            report.health_score = Some(health.score.score);
            report.health = Some(health.score.clone());
        }
        tracing::info!(services = report.services.len(), "deployment succeeded");
        conclude(report, timeline, completed.into_parts())
    }

    /// Tear down the recorded deployment by replaying its journal.
    ///
    /// A fully restored host loses its record, and the record the deployment
    /// replaced (if any) becomes current again. Steps that fail stay in the
    /// record so a later rollback can retry them.
    ///
    /// # Errors
    ///
    /// `NotDeployed` without a record, `Locked` while another run is active,
    /// `RollbackIncomplete` when some steps need manual intervention.
    pub async fn rollback(
        &self,
        config: &Config,
        force_lock: bool,
    ) -> Result<RollbackSummary, DeployError> {
        let state_dir = &config.paths.state_dir;
        let record = DeploymentRecord::require(state_dir)?;
        let lock = DeployLock::acquire(state_dir, "rollback", force_lock)?;

        let mut timeline = Timeline::new(self.seams.events);
        timeline.begin(Phase::RollingBack);
        let result = self.teardown(state_dir, record).await;
        match &result {
            Ok(_) => timeline.succeed(),
            Err(e) => {
                timeline.fail(e);
            }
        }

        if let Err(e) = lock.release() {
            tracing::warn!(error = %e, "failed to release deploy lock");
        }
        result
    }

    async fn teardown(
        &self,
        state_dir: &Path,
        mut record: DeploymentRecord,
    ) -> Result<RollbackSummary, DeployError> {
        let strategy = self.seams.strategies.strategy(record.strategy);
        let mut log = RollbackLog::from_journal(std::mem::take(&mut record.journal));
        let reverser = HostReverser::new(self.seams.runner, &*strategy);
        let summary = log.replay(&reverser).await;

        for manual in &summary.manual {
            self.seams.events.emit(&DeployEvent::ManualIntervention {
                label: manual.label.clone(),
                error: manual.error.clone(),
            });
        }

        if !summary.fully_restored() {
            // Journal order is oldest first; replay order is newest first.
            record.journal = summary
                .manual
                .iter()
                .rev()
                .map(|m| RollbackStep::new(m.label.clone(), m.action.clone()))
                .collect();
            record.save(state_dir)?;
            return Err(DeployError::RollbackIncomplete {
                steps: summary.manual,
            });
        }

        DeploymentRecord::remove(state_dir)?;
        if let Some(previous) = record.previous {
            tracing::info!(deployed_at = %previous.deployed_at, "previous deployment is current again");
            previous.save(state_dir)?;
        }
        Ok(summary.into())
    }
}

fn resolve(sources: &ConfigSources, inventory: &Inventory) -> Result<Config, DeployError> {
    let config = ConfigResolver::resolve(sources)?;
    inventory.check_strategy(config.strategy)?;
    Ok(config)
}

/// Roll back a run that failed after pre-flight, then finish the report.
async fn abort<S: Mutated>(
    mut report: DeploymentReport,
    mut timeline: Timeline<'_>,
    deployment: Deployment<'_, S>,
    err: DeployError,
) -> DeploymentReport {
    if let Some(phase) = timeline.fail(&err) {
        report.fail(phase, &err);
    }
    report.installed = deployment.installed().installed.clone();

    timeline.begin(Phase::RollingBack);
    let (rolled_back, summary) = deployment.roll_back().await;
    if summary.fully_restored() {
        timeline.succeed();
    } else {
        let incomplete = DeployError::RollbackIncomplete {
            steps: summary.manual.clone(),
        };
        timeline.fail(&incomplete);
        report.rollback_error = Some(ReportedError::from(&incomplete));
    }
    report.rollback = Some(RollbackSummary::from(summary));

    conclude(report, timeline, rolled_back.into_parts())
}

/// Release the lock, attach warnings and close the timeline.
fn conclude(
    mut report: DeploymentReport,
    timeline: Timeline<'_>,
    (lock, mut diagnostics): (Option<DeployLock>, Diagnostics),
) -> DeploymentReport {
    if let Some(lock) = lock
        && let Err(e) = lock.release()
    {
        diagnostics.warn(WarningKind::LockRelease, e.to_string());
    }
    report.warnings = diagnostics.into_warnings();
    timeline.close(&mut report);
    report
}
