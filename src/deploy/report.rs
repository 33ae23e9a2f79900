// ABOUTME: Deployment report produced when a run reaches a terminal state.
// ABOUTME: Also holds the phase timeline that feeds both events and the report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use super::error::{DeployError, DeployErrorKind};
use super::phase::Phase;
use super::record::DeployedService;
use super::rollback::{ManualIntervention, ReplaySummary};
use crate::config::StrategyKind;
use crate::diagnostics::Warning;
use crate::events::{DeployEvent, EventSink};
use crate::health::HealthScore;
use crate::preflight::{InstallMode, PreflightFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedError {
    pub kind: DeployErrorKind,
    pub message: String,
}

impl From<&DeployError> for ReportedError {
    fn from(err: &DeployError) -> Self {
        ReportedError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    pub steps_replayed: usize,
    /// Labels in replay order (newest first).
    pub replayed: Vec<String>,
    pub manual_intervention: Vec<ManualIntervention>,
    pub fully_restored: bool,
}

impl From<ReplaySummary> for RollbackSummary {
    fn from(summary: ReplaySummary) -> Self {
        RollbackSummary {
            steps_replayed: summary.replayed.len(),
            fully_restored: summary.fully_restored(),
            replayed: summary.replayed,
            manual_intervention: summary.manual,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    /// `Succeeded` or `Failed`.
    pub outcome: Phase,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_mode: Option<InstallMode>,
    pub phases: Vec<PhaseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preflight_failures: Vec<PreflightFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub installed: Vec<String>,
    pub services: Vec<DeployedService>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSummary>,
    /// Set when reverse actions failed and the host needs manual attention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<ReportedError>,
    pub warnings: Vec<Warning>,
}

impl DeploymentReport {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        DeploymentReport {
            outcome: Phase::Failed,
            host: gethostname::gethostname().to_string_lossy().into_owned(),
            started_at,
            elapsed_ms: 0,
            strategy: None,
            install_mode: None,
            phases: Vec::new(),
            failed_phase: None,
            error: None,
            preflight_failures: Vec::new(),
            installed: Vec::new(),
            services: Vec::new(),
            health_score: None,
            health: None,
            rollback: None,
            rollback_error: None,
            warnings: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Phase::Succeeded
    }

    /// Whether the host is back in its pre-run state (trivially true on success).
    pub fn fully_restored(&self) -> bool {
        self.rollback.as_ref().is_none_or(|r| r.fully_restored)
    }

    /// Record the failure cause and its phase.
    pub(crate) fn fail(&mut self, phase: Phase, err: &DeployError) {
        self.failed_phase = Some(phase);
        self.error = Some(ReportedError::from(err));
        match err {
            DeployError::PreflightFailed { failures } => {
                self.preflight_failures = failures.clone();
            }
            DeployError::HealthCheckTimeout { last_score, .. } => {
                self.health_score = Some(*last_score);
            }
            _ => {}
        }
    }
}

/// Phase bookkeeping: emits events and keeps per-phase outcomes.
pub(crate) struct Timeline<'a> {
    events: &'a dyn EventSink,
    started: Instant,
    current: Option<(Phase, Instant)>,
    phases: Vec<PhaseRecord>,
}

impl<'a> Timeline<'a> {
    pub(crate) fn new(events: &'a dyn EventSink) -> Self {
        Timeline {
            events,
            started: Instant::now(),
            current: None,
            phases: Vec::new(),
        }
    }

    pub(crate) fn events(&self) -> &'a dyn EventSink {
        self.events
    }

    pub(crate) fn begin(&mut self, phase: Phase) {
        tracing::info!(%phase, "phase started");
        self.events.emit(&DeployEvent::PhaseStarted { phase });
        self.current = Some((phase, Instant::now()));
    }

    pub(crate) fn succeed(&mut self) {
        if let Some((phase, since)) = self.current.take() {
            let elapsed_ms = since.elapsed().as_millis() as u64;
            self.events
                .emit(&DeployEvent::PhaseCompleted { phase, elapsed_ms });
            self.phases.push(PhaseRecord {
                phase,
                status: PhaseStatus::Succeeded,
                elapsed_ms,
            });
        }
    }

    /// Close the current phase as failed and return it.
    pub(crate) fn fail(&mut self, err: &DeployError) -> Option<Phase> {
        let (phase, since) = self.current.take()?;
        tracing::error!(%phase, error = %err, "phase failed");
        self.events.emit(&DeployEvent::PhaseFailed {
            phase,
            error: err.to_string(),
        });
        self.phases.push(PhaseRecord {
            phase,
            status: PhaseStatus::Failed,
            elapsed_ms: since.elapsed().as_millis() as u64,
        });
        Some(phase)
    }

    pub(crate) fn close(self, report: &mut DeploymentReport) {
        report.elapsed_ms = self.started.elapsed().as_millis() as u64;
        report.phases = self.phases;
        self.events.emit(&DeployEvent::Finished {
            outcome: report.outcome,
            elapsed_ms: report.elapsed_ms,
        });
    }
}
