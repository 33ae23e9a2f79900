// ABOUTME: Deployment events emitted by the engine while a run progresses.
// ABOUTME: The presentation layer implements EventSink; the engine never prints.

use serde::Serialize;

use crate::deploy::Phase;
use crate::health::Dimension;
use crate::preflight::InstallMode;
use crate::types::ServiceName;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeployEvent {
    PhaseStarted {
        phase: Phase,
    },
    PhaseCompleted {
        phase: Phase,
        elapsed_ms: u64,
    },
    PhaseFailed {
        phase: Phase,
        error: String,
    },
    ModeDetected {
        mode: InstallMode,
    },
    CheckFailed {
        check: String,
        reason: String,
    },
    RequirementSatisfied {
        name: String,
    },
    RequirementInstalled {
        name: String,
    },
    ServiceActivated {
        service: ServiceName,
        rank: u32,
        handle: String,
    },
    HealthAttempt {
        attempt: u32,
        score: f64,
        ready: bool,
    },
    HealthWarning {
        dimension: Dimension,
        detail: String,
    },
    StepReversed {
        label: String,
    },
    ManualIntervention {
        label: String,
        error: String,
    },
    /// The run reached `Succeeded` or `Failed`.
    Finished {
        outcome: Phase,
        elapsed_ms: u64,
    },
}

/// Receives events as they happen.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DeployEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &DeployEvent) {}
}
