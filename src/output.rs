// ABOUTME: Terminal rendering of engine events, reports and command results.
// ABOUTME: Normal mode prints progress lines, quiet mode only results, JSON mode one object per line.

use serde::Serialize;
use serde_json::json;
use std::time::Instant;

use crate::deploy::{DeploymentReport, Phase, RollbackSummary, StatusSnapshot};
use crate::events::{DeployEvent, EventSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Normal,
    /// Results only, for CI logs.
    Quiet,
    /// One JSON object per line.
    Json,
}

pub struct Output {
    mode: OutputMode,
    since: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode, since: None }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Results printed after this carry the elapsed time.
    pub fn start_timer(&mut self) {
        self.since = Some(Instant::now());
    }

    fn elapsed(&self) -> Option<f64> {
        self.since.map(|t| t.elapsed().as_secs_f64())
    }

    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if self.mode == OutputMode::Json {
            self.record("warning", message, false);
        } else {
            eprintln!("Warning: {message}");
        }
    }

    pub fn success(&self, message: &str) {
        match (self.mode, self.elapsed()) {
            (OutputMode::Json, _) => self.record("success", message, false),
            (OutputMode::Normal, Some(secs)) => println!("{message} ({secs:.1}s)"),
            _ => println!("{message}"),
        }
    }

    pub fn error(&self, message: &str) {
        if self.mode == OutputMode::Json {
            self.record("error", message, true);
        } else {
            eprintln!("Error: {message}");
        }
    }

    /// Pretty-printed document, for command results that are data.
    pub fn json<T: Serialize>(&self, value: &T) {
        if let Ok(text) = serde_json::to_string_pretty(value) {
            println!("{text}");
        }
    }

    fn line<T: Serialize>(&self, value: &T) {
        if let Ok(text) = serde_json::to_string(value) {
            println!("{text}");
        }
    }

    fn record(&self, event: &str, message: &str, to_stderr: bool) {
        let mut value = json!({ "event": event, "message": message });
        if let Some(secs) = self.elapsed() {
            value["duration_secs"] = json!(secs);
        }
        if to_stderr {
            eprintln!("{value}");
        } else {
            println!("{value}");
        }
    }

    /// Final report of a deployment run.
    pub fn report(&self, report: &DeploymentReport) {
        if self.mode == OutputMode::Json {
            self.line(report);
            return;
        }

        for warning in &report.warnings {
            self.warning(&warning.to_string());
        }
        if report.succeeded() {
            let score = report
                .health_score
                .map(|s| format!(", health {:.2}", s))
                .unwrap_or_default();
            self.success(&format!(
                "Deployed {} service(s) on {}{}",
                report.services.len(),
                report.host,
                score
            ));
            return;
        }

        let phase = report.failed_phase.unwrap_or(Phase::Failed);
        let cause = report
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown error");
        self.error(&format!("deployment failed during {}: {}", phase, cause));
        for failure in &report.preflight_failures {
            eprintln!("  - {}", failure);
        }
        if let Some(rollback) = &report.rollback {
            self.rollback_summary(rollback);
        }
    }

    pub fn rollback_summary(&self, summary: &RollbackSummary) {
        if self.mode == OutputMode::Json {
            self.line(summary);
            return;
        }
        if summary.fully_restored {
            eprintln!(
                "Rolled back {} step(s); host restored",
                summary.steps_replayed
            );
        } else {
            eprintln!("Rollback incomplete; manual intervention needed:");
            for manual in &summary.manual_intervention {
                eprintln!("  - {}: {}", manual.label, manual.error);
            }
        }
    }

    pub fn status(&self, status: &StatusSnapshot) {
        if self.mode == OutputMode::Json {
            self.json(status);
            return;
        }
        println!(
            "{} via {} (deployed {} by shipwright {})",
            status.domain, status.strategy, status.deployed_at, status.version
        );
        for service in &status.services {
            let state = if service.running { "running" } else { "stopped" };
            match &service.error {
                Some(error) => println!("  {:<14} {:<8} {}", service.name, state, error),
                None => println!("  {:<14} {:<8} {}", service.name, state, service.handle),
            }
        }
        println!(
            "health {:.2} ({})",
            status.health.score,
            if status.health.ready { "ready" } else { "not ready" }
        );
        for sample in status.health.failed() {
            println!("  {}: {}", sample.dimension, sample.detail);
        }
    }
}

impl EventSink for Output {
    fn emit(&self, event: &DeployEvent) {
        match self.mode {
            OutputMode::Quiet => {}
            OutputMode::Json => self.line(event),
            OutputMode::Normal => {
                if let Some(line) = describe(event) {
                    println!("{line}");
                }
            }
        }
    }
}

/// Human-readable progress line for an event, if it warrants one.
fn describe(event: &DeployEvent) -> Option<String> {
    let line = match event {
        DeployEvent::PhaseStarted { phase } => format!("→ {}...", phase),
        DeployEvent::PhaseCompleted { phase, elapsed_ms } => {
            format!("  ✓ {} ({} ms)", phase, elapsed_ms)
        }
        DeployEvent::PhaseFailed { phase, error } => format!("  ✗ {}: {}", phase, error),
        DeployEvent::ModeDetected { mode } => format!("  → {} install", mode),
        DeployEvent::CheckFailed { check, reason } => format!("  ✗ [{}] {}", check, reason),
        DeployEvent::RequirementSatisfied { .. } => return None,
        DeployEvent::RequirementInstalled { name } => format!("  → installed {}", name),
        DeployEvent::ServiceActivated {
            service,
            rank,
            handle,
        } => format!("  → {} (rank {}) up: {}", service, rank, handle),
        DeployEvent::HealthAttempt {
            attempt,
            score,
            ready,
        } => format!(
            "  → health attempt {}: {:.2}{}",
            attempt,
            score,
            if *ready { " ready" } else { "" }
        ),
        DeployEvent::HealthWarning { dimension, detail } => {
            format!("  ! {}: {}", dimension, detail)
        }
        DeployEvent::StepReversed { label } => format!("  ↺ {}", label),
        DeployEvent::ManualIntervention { label, error } => {
            format!("  ✗ could not undo {}: {}", label, error)
        }
        DeployEvent::Finished { .. } => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::InstallMode;

    #[test]
    fn describes_progress_events() {
        let line = describe(&DeployEvent::PhaseStarted {
            phase: Phase::Executing,
        });
        assert_eq!(line.as_deref(), Some("→ executing..."));

        let line = describe(&DeployEvent::ModeDetected {
            mode: InstallMode::Upgrade,
        });
        assert_eq!(line.as_deref(), Some("  → upgrade install"));
    }

    #[test]
    fn quiet_events_are_skipped() {
        assert!(
            describe(&DeployEvent::RequirementSatisfied {
                name: "systemd".to_string()
            })
            .is_none()
        );
    }
}
