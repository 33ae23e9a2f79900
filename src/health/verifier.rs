// ABOUTME: Health verification: concurrent probes per attempt, bounded retries.
// ABOUTME: Ready when mandatory dimensions pass and the weighted score meets the threshold.

use tokio_util::sync::CancellationToken;

use super::probes::{self, ProbeContext, bounded};
use super::{Dimension, HealthSample, HealthScore};
use crate::deploy::{DeployError, Phase};
use crate::events::{DeployEvent, EventSink};

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedHealth {
    pub score: HealthScore,
    pub attempts: u32,
    /// Advisory dimensions that failed on the successful attempt.
    pub warnings: Vec<HealthSample>,
}

pub struct HealthVerifier<'a> {
    ctx: ProbeContext<'a>,
}

impl<'a> HealthVerifier<'a> {
    pub fn new(ctx: ProbeContext<'a>) -> Self {
        HealthVerifier { ctx }
    }

    /// One pass over every dimension, probes running concurrently.
    pub async fn evaluate(&self) -> HealthScore {
        let ctx = self.ctx;
        let limit = ctx.config.health.probe_timeout;
        let (liveness, endpoint, disk, memory, permissions, logs) = tokio::join!(
            bounded(Dimension::Liveness, limit, probes::liveness(ctx)),
            bounded(Dimension::Endpoint, limit, probes::endpoint(ctx)),
            bounded(Dimension::DiskUsage, limit, probes::disk_usage(ctx)),
            bounded(Dimension::MemoryUsage, limit, probes::memory_usage(ctx)),
            bounded(Dimension::Permissions, limit, probes::permissions(ctx)),
            bounded(Dimension::LogErrors, limit, probes::log_errors(ctx)),
        );
        HealthScore::compute(
            vec![liveness, endpoint, disk, memory, permissions, logs],
            &ctx.config.health,
        )
    }

    /// Evaluate until ready or the attempt budget is spent.
    pub async fn verify(
        &self,
        cancel: &CancellationToken,
        events: &dyn EventSink,
    ) -> Result<VerifiedHealth, DeployError> {
        let policy = &self.ctx.config.health;
        let mut last_score = 0.0;

        for attempt in 1..=policy.attempts {
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled {
                    phase: Phase::VerifyingHealth,
                });
            }

            let score = self.evaluate().await;
            tracing::debug!(attempt, score = score.score, ready = score.ready, "health attempt");
            events.emit(&DeployEvent::HealthAttempt {
                attempt,
                score: score.score,
                ready: score.ready,
            });

            if score.ready {
                let warnings: Vec<HealthSample> =
                    score.advisory_failures(policy).cloned().collect();
                for warning in &warnings {
                    tracing::warn!(dimension = %warning.dimension, detail = %warning.detail, "advisory health check failed");
                    events.emit(&DeployEvent::HealthWarning {
                        dimension: warning.dimension,
                        detail: warning.detail.clone(),
                    });
                }
                return Ok(VerifiedHealth {
                    score,
                    attempts: attempt,
                    warnings,
                });
            }

            for sample in score.failed() {
                tracing::debug!(dimension = %sample.dimension, detail = %sample.detail, "dimension failing");
            }
            last_score = score.score;

            if attempt < policy.attempts {
                tokio::select! {
                    _ = tokio::time::sleep(policy.interval) => {}
                    _ = cancel.cancelled() => {
                        return Err(DeployError::Cancelled { phase: Phase::VerifyingHealth });
                    }
                }
            }
        }

        Err(DeployError::HealthCheckTimeout {
            last_score,
            attempts: policy.attempts,
        })
    }
}
