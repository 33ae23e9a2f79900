// ABOUTME: Non-fatal findings collected while a deployment runs.
// ABOUTME: Each finding is logged once and copied into the final report.

use serde::Serialize;
use std::fmt;

/// What a warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// The lock file could not be removed; the next run may need `--force`.
    LockRelease,
    /// An advisory health dimension failed on the attempt that passed.
    AdvisoryHealth,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WarningKind::LockRelease => "lock release",
            WarningKind::AdvisoryHealth => "health",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Warnings accumulated by one run, in the order they were raised.
#[derive(Debug, Default)]
pub struct Diagnostics(Vec<Warning>);

impl Diagnostics {
    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        let warning = Warning {
            kind,
            message: message.into(),
        };
        tracing::warn!(kind = %kind, "{}", warning.message);
        self.0.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_warnings_in_order() {
        let mut diag = Diagnostics::default();
        assert!(diag.is_empty());

        diag.warn(WarningKind::LockRelease, "permission denied");
        diag.warn(WarningKind::AdvisoryHealth, "log_errors: 3 error line(s)");

        let warnings = diag.into_warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[1].kind, WarningKind::AdvisoryHealth);
        assert_eq!(
            warnings[0].to_string(),
            "lock release: permission denied"
        );
    }
}
