// ABOUTME: One probe per health dimension, each producing a single sample.
// ABOUTME: Probes only read: strategy status, HTTP endpoints, host capacity, files and logs.

use std::time::Duration;

use super::{Dimension, HealthSample, Measurement};
use crate::config::Config;
use crate::deploy::ActivationStrategy;
use crate::host::{EndpointProbe, HostInspector};
use crate::inventory::Inventory;

/// Everything a probe may look at.
#[derive(Clone, Copy)]
pub struct ProbeContext<'a> {
    pub config: &'a Config,
    pub inventory: &'a Inventory,
    pub strategy: &'a dyn ActivationStrategy,
    pub host: &'a dyn HostInspector,
    pub endpoint: &'a dyn EndpointProbe,
}

/// Markers counted as errors in service output.
const ERROR_MARKERS: [&str; 3] = ["error", "panic", "fatal"];

/// Run a probe, failing its dimension when it does not finish in time.
pub(super) async fn bounded<F>(dimension: Dimension, limit: Duration, probe: F) -> HealthSample
where
    F: Future<Output = HealthSample>,
{
    match tokio::time::timeout(limit, probe).await {
        Ok(sample) => sample,
        Err(_) => HealthSample::fail(
            dimension,
            Measurement::Flag(false),
            format!("probe timed out after {:?}", limit),
        ),
    }
}

pub(super) async fn liveness(ctx: ProbeContext<'_>) -> HealthSample {
    let mut down = Vec::new();
    let mut running = 0u64;
    for service in ctx.inventory.iter() {
        match ctx.strategy.is_running(&service.name).await {
            Ok(true) => running += 1,
            Ok(false) => down.push(service.name.to_string()),
            Err(e) => down.push(format!("{} ({})", service.name, e)),
        }
    }
    let value = Measurement::Count(running);
    if down.is_empty() {
        HealthSample::pass(Dimension::Liveness, value, format!("{} running", running))
    } else {
        HealthSample::fail(
            Dimension::Liveness,
            value,
            format!("not running: {}", down.join(", ")),
        )
    }
}

pub(super) async fn endpoint(ctx: ProbeContext<'_>) -> HealthSample {
    let timeout = ctx.config.health.probe_timeout;
    let mut failures = Vec::new();
    let mut checked = 0u64;
    for service in ctx.inventory.iter() {
        let Some((port, path)) = service.http_probe(&ctx.config.ports) else {
            continue;
        };
        checked += 1;
        match ctx.endpoint.get(port, path, timeout).await {
            Ok(status) if (200..400).contains(&status) => {}
            Ok(status) => failures.push(format!("{} {}:{} returned {}", service.name, port, path, status)),
            Err(e) => failures.push(format!("{} {}:{}: {}", service.name, port, path, e)),
        }
    }
    if checked == 0 {
        return HealthSample::fail(
            Dimension::Endpoint,
            Measurement::Count(0),
            "no service exposes an HTTP probe",
        );
    }
    if failures.is_empty() {
        HealthSample::pass(
            Dimension::Endpoint,
            Measurement::Count(checked),
            format!("{} endpoint(s) answered", checked),
        )
    } else {
        HealthSample::fail(
            Dimension::Endpoint,
            Measurement::Count(checked - failures.len() as u64),
            failures.join("; "),
        )
    }
}

pub(super) async fn disk_usage(ctx: ProbeContext<'_>) -> HealthSample {
    let limit = ctx.config.health.max_disk_ratio;
    match ctx.host.disk(&ctx.config.paths.data_dir).await {
        Ok(capacity) => ratio_sample(Dimension::DiskUsage, capacity.used_ratio(), limit),
        Err(e) => HealthSample::fail(Dimension::DiskUsage, Measurement::Flag(false), e.to_string()),
    }
}

pub(super) async fn memory_usage(ctx: ProbeContext<'_>) -> HealthSample {
    let limit = ctx.config.health.max_memory_ratio;
    match ctx.host.memory().await {
        Ok(capacity) => ratio_sample(Dimension::MemoryUsage, capacity.used_ratio(), limit),
        Err(e) => HealthSample::fail(Dimension::MemoryUsage, Measurement::Flag(false), e.to_string()),
    }
}

fn ratio_sample(dimension: Dimension, used: f64, limit: f64) -> HealthSample {
    let detail = format!("{:.0}% used (limit {:.0}%)", used * 100.0, limit * 100.0);
    if used <= limit {
        HealthSample::pass(dimension, Measurement::Ratio(used), detail)
    } else {
        HealthSample::fail(dimension, Measurement::Ratio(used), detail)
    }
}

/// The env file holds the signing secret and must be private to its owner.
pub(super) async fn permissions(ctx: ProbeContext<'_>) -> HealthSample {
    let env_file = ctx.config.paths.env_file();
    let problem = match ctx.host.file_mode(&env_file).await {
        Ok(Some(mode)) if mode & 0o077 == 0 => None,
        Ok(Some(mode)) => Some(format!("{} has mode {:o}", env_file.display(), mode)),
        Ok(None) => Some(format!("{} is missing", env_file.display())),
        Err(e) => Some(e.to_string()),
    };
    let problem = match problem {
        None => match ctx.host.file_mode(&ctx.config.paths.data_dir).await {
            Ok(Some(_)) => None,
            Ok(None) => Some(format!("{} is missing", ctx.config.paths.data_dir.display())),
            Err(e) => Some(e.to_string()),
        },
        some => some,
    };
    match problem {
        None => HealthSample::pass(
            Dimension::Permissions,
            Measurement::Flag(true),
            "env file is owner-only",
        ),
        Some(detail) => HealthSample::fail(Dimension::Permissions, Measurement::Flag(false), detail),
    }
}

pub(super) async fn log_errors(ctx: ProbeContext<'_>) -> HealthSample {
    let policy = &ctx.config.health;
    let mut errors = 0u64;
    let mut unreadable = Vec::new();
    for service in ctx.inventory.iter() {
        match ctx
            .strategy
            .recent_logs(&service.name, policy.log_tail_lines)
            .await
        {
            Ok(lines) => errors += count_error_lines(&lines),
            Err(e) => unreadable.push(format!("{}: {}", service.name, e)),
        }
    }

    let value = Measurement::Count(errors);
    if !unreadable.is_empty() {
        return HealthSample::fail(
            Dimension::LogErrors,
            value,
            format!("logs unavailable for {}", unreadable.join(", ")),
        );
    }
    let detail = format!("{} error line(s) in recent output", errors);
    if errors <= u64::from(policy.max_log_errors) {
        HealthSample::pass(Dimension::LogErrors, value, detail)
    } else {
        HealthSample::fail(Dimension::LogErrors, value, detail)
    }
}

pub(crate) fn count_error_lines(lines: &[String]) -> u64 {
    lines
        .iter()
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.contains(m))
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_error_markers_case_insensitively() {
        let lines: Vec<String> = [
            "INFO listening on :8082",
            "ERROR upstream refused",
            "thread 'main' panicked at src/main.rs",
            "Fatal: cannot open database",
            "WARN retrying in 5s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(count_error_lines(&lines), 3);
    }

    #[test]
    fn ratio_sample_respects_limit() {
        assert!(ratio_sample(Dimension::DiskUsage, 0.5, 0.9).passed);
        assert!(!ratio_sample(Dimension::DiskUsage, 0.95, 0.9).passed);
    }

    #[tokio::test]
    async fn slow_probe_fails_its_dimension() {
        let sample = bounded(Dimension::Endpoint, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            HealthSample::pass(Dimension::Endpoint, Measurement::Flag(true), "late")
        })
        .await;
        assert!(!sample.passed);
        assert_eq!(sample.dimension, Dimension::Endpoint);
    }
}
