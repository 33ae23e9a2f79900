// ABOUTME: Multi-dimensional health model: dimensions, samples and composite scores.
// ABOUTME: The verifier loop lives in verifier.rs, the individual probes in probes.rs.

mod probes;
mod verifier;

pub use probes::ProbeContext;
pub use verifier::{HealthVerifier, VerifiedHealth};

use crate::config::HealthPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One readiness dimension evaluated on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Liveness,
    Endpoint,
    DiskUsage,
    MemoryUsage,
    Permissions,
    LogErrors,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Liveness,
        Dimension::Endpoint,
        Dimension::DiskUsage,
        Dimension::MemoryUsage,
        Dimension::Permissions,
        Dimension::LogErrors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Liveness => "liveness",
            Dimension::Endpoint => "endpoint",
            Dimension::DiskUsage => "disk_usage",
            Dimension::MemoryUsage => "memory_usage",
            Dimension::Permissions => "permissions",
            Dimension::LogErrors => "log_errors",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a probe measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Measurement {
    Flag(bool),
    Ratio(f64),
    Count(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub dimension: Dimension,
    pub passed: bool,
    pub value: Measurement,
    pub detail: String,
    pub observed_at: DateTime<Utc>,
}

impl HealthSample {
    pub fn pass(dimension: Dimension, value: Measurement, detail: impl Into<String>) -> Self {
        Self::new(dimension, true, value, detail)
    }

    pub fn fail(dimension: Dimension, value: Measurement, detail: impl Into<String>) -> Self {
        Self::new(dimension, false, value, detail)
    }

    fn new(
        dimension: Dimension,
        passed: bool,
        value: Measurement,
        detail: impl Into<String>,
    ) -> Self {
        HealthSample {
            dimension,
            passed,
            value,
            detail: detail.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Composite result of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    /// Weighted fraction of passing dimensions, 0.0..=1.0.
    pub score: f64,
    pub ready: bool,
    pub samples: Vec<HealthSample>,
}

impl HealthScore {
    /// Score a set of samples against the policy.
    ///
    /// Ready requires every mandatory dimension to pass and the weighted
    /// score to reach the threshold. A mandatory dimension with no sample
    /// counts as failed.
    pub fn compute(samples: Vec<HealthSample>, policy: &HealthPolicy) -> Self {
        let total: f64 = samples.iter().map(|s| policy.weight(s.dimension)).sum();
        let passed: f64 = samples
            .iter()
            .filter(|s| s.passed)
            .map(|s| policy.weight(s.dimension))
            .sum();
        let score = if total > 0.0 { passed / total } else { 0.0 };

        let mandatory_ok = policy
            .mandatory
            .iter()
            .all(|d| samples.iter().any(|s| s.dimension == *d && s.passed));

        HealthScore {
            score,
            ready: mandatory_ok && score >= policy.threshold,
            samples,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &HealthSample> {
        self.samples.iter().filter(|s| !s.passed)
    }

    /// Advisory dimensions that failed; warnings when the score is ready.
    pub fn advisory_failures<'a>(
        &'a self,
        policy: &'a HealthPolicy,
    ) -> impl Iterator<Item = &'a HealthSample> + 'a {
        self.failed().filter(move |s| !policy.is_mandatory(s.dimension))
    }
}
