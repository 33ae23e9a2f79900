// ABOUTME: Health verification policy: attempt budget, weights and readiness rules.
// ABOUTME: The mandatory/advisory split and threshold are configuration, not code.

use crate::health::Dimension;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// Number of verification attempts before giving up.
    pub attempts: u32,
    /// Delay between attempts.
    pub interval: Duration,
    /// Upper bound for a single probe within an attempt.
    pub probe_timeout: Duration,
    /// Minimum weighted fraction of passing dimensions.
    pub threshold: f64,
    /// Dimensions that must pass regardless of score.
    pub mandatory: Vec<Dimension>,
    /// Relative weight of each dimension; missing entries weigh 1.
    pub weights: BTreeMap<Dimension, f64>,
    pub max_disk_ratio: f64,
    pub max_memory_ratio: f64,
    /// Error lines tolerated across the recent log tails of all services
    /// combined.
    pub max_log_errors: u32,
    pub log_tail_lines: u32,
}

impl HealthPolicy {
    pub fn weight(&self, dimension: Dimension) -> f64 {
        self.weights.get(&dimension).copied().unwrap_or(1.0)
    }

    pub fn is_mandatory(&self, dimension: Dimension) -> bool {
        self.mandatory.contains(&dimension)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.attempts == 0 {
            return Err("health.attempts must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!(
                "health.threshold must be within 0..=1, got {}",
                self.threshold
            ));
        }
        for ratio in [self.max_disk_ratio, self.max_memory_ratio] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(format!("usage ratios must be within 0..=1, got {}", ratio));
            }
        }
        if let Some((dimension, weight)) = self.weights.iter().find(|(_, w)| **w < 0.0 || !w.is_finite()) {
            return Err(format!("weight for {} must be non-negative, got {}", dimension, weight));
        }
        if Dimension::ALL.iter().map(|d| self.weight(*d)).sum::<f64>() <= 0.0 {
            return Err("at least one health dimension needs a positive weight".to_string());
        }
        Ok(())
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        let weights = Dimension::ALL
            .iter()
            .map(|d| {
                let weight = match d {
                    Dimension::Liveness | Dimension::Endpoint => 3.0,
                    _ => 1.0,
                };
                (*d, weight)
            })
            .collect();

        HealthPolicy {
            attempts: 12,
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
            threshold: 0.5,
            mandatory: vec![Dimension::Liveness, Dimension::Endpoint],
            weights,
            max_disk_ratio: 0.9,
            max_memory_ratio: 0.9,
            max_log_errors: 0,
            log_tail_lines: 200,
        }
    }
}
