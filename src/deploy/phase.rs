// ABOUTME: Phases of a deployment run, in their fixed order.
// ABOUTME: Used by events, reports and errors; the pipeline's type states mirror them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Resolving,
    PreflightChecking,
    InstallingDependencies,
    Executing,
    VerifyingHealth,
    Succeeded,
    RollingBack,
    Failed,
}

impl Phase {
    /// Forward phases in execution order.
    pub const FORWARD: [Phase; 5] = [
        Phase::Resolving,
        Phase::PreflightChecking,
        Phase::InstallingDependencies,
        Phase::Executing,
        Phase::VerifyingHealth,
    ];

    /// Whether a failure in this phase may have mutated the host.
    pub fn needs_rollback(&self) -> bool {
        matches!(
            self,
            Phase::InstallingDependencies | Phase::Executing | Phase::VerifyingHealth
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Resolving => "resolving",
            Phase::PreflightChecking => "preflight_checking",
            Phase::InstallingDependencies => "installing_dependencies",
            Phase::Executing => "executing",
            Phase::VerifyingHealth => "verifying_health",
            Phase::Succeeded => "succeeded",
            Phase::RollingBack => "rolling_back",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_skipped_before_mutation() {
        assert!(!Phase::Resolving.needs_rollback());
        assert!(!Phase::PreflightChecking.needs_rollback());
        assert!(Phase::InstallingDependencies.needs_rollback());
        assert!(Phase::Executing.needs_rollback());
        assert!(Phase::VerifyingHealth.needs_rollback());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::InstallingDependencies).unwrap(),
            "\"installing_dependencies\""
        );
    }
}
