// ABOUTME: Integration tests for health verification.
// ABOUTME: Mandatory dimensions gate readiness; retries are bounded by the attempt budget.

mod support;

use std::os::unix::fs::PermissionsExt;
use tokio_util::sync::CancellationToken;

use shipwright::config::Config;
use shipwright::deploy::DeployError;
use shipwright::events::DeployEvent;
use shipwright::health::{Dimension, HealthVerifier, ProbeContext};
use shipwright::host::Capacity;
use shipwright::inventory::Inventory;
use support::{FakeHost, FakeProbe, FakeStrategy, GIB, RecordingSink, test_config, three_services};

fn all_running() -> FakeStrategy {
    let strategy = FakeStrategy::default();
    strategy
        .running
        .lock()
        .unwrap()
        .extend(["api", "web", "worker"].map(String::from));
    strategy
}

fn write_env_file(config: &Config) {
    std::fs::create_dir_all(&config.paths.data_dir).unwrap();
    let path = config.paths.env_file();
    std::fs::write(&path, config.render_env_file()).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
}

#[tokio::test]
async fn healthy_stack_is_ready_on_first_attempt() {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    write_env_file(&config);
    let inventory = three_services();
    let strategy = all_running();
    let host = FakeHost::default();
    let probe = FakeProbe::ok();
    let sink = RecordingSink::default();

    let verified = HealthVerifier::new(ProbeContext {
        config: &config,
        inventory: &inventory,
        strategy: &strategy,
        host: &host,
        endpoint: &probe,
    })
    .verify(&CancellationToken::new(), &sink)
    .await
    .unwrap();

    assert_eq!(verified.attempts, 1);
    assert!((verified.score.score - 1.0).abs() < f64::EPSILON);
    assert!(verified.warnings.is_empty());
}

#[tokio::test]
async fn advisory_failures_become_warnings() {
    let dir = tempfile::tempdir().unwrap();
    // No env file: permissions fails.
    let config = test_config(dir.path(), &[]);
    let inventory = three_services();
    let strategy = all_running();
    let host = FakeHost {
        disk: Capacity {
            total: 10 * GIB,
            available: 0,
        },
        ..FakeHost::default()
    };
    let probe = FakeProbe::ok();
    let sink = RecordingSink::default();

    let verified = HealthVerifier::new(ProbeContext {
        config: &config,
        inventory: &inventory,
        strategy: &strategy,
        host: &host,
        endpoint: &probe,
    })
    .verify(&CancellationToken::new(), &sink)
    .await
    .unwrap();

    assert!(verified.score.ready);
    let dimensions: Vec<Dimension> = verified.warnings.iter().map(|w| w.dimension).collect();
    assert!(dimensions.contains(&Dimension::DiskUsage));
    assert!(dimensions.contains(&Dimension::Permissions));
    let warned = sink
        .events()
        .iter()
        .filter(|e| matches!(e, DeployEvent::HealthWarning { .. }))
        .count();
    assert_eq!(warned, verified.warnings.len());
}

#[tokio::test]
async fn refused_endpoint_times_out_after_attempt_budget() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    write_env_file(&config);
    let inventory = three_services();
    let strategy = all_running();
    let host = FakeHost::default();
    let probe = FakeProbe::refusing();
    let sink = RecordingSink::default();

    let err = HealthVerifier::new(ProbeContext {
        config: &config,
        inventory: &inventory,
        strategy: &strategy,
        host: &host,
        endpoint: &probe,
    })
    .verify(&CancellationToken::new(), &sink)
    .await
    .unwrap_err();

    match err {
        DeployError::HealthCheckTimeout {
            attempts,
            last_score,
        } => {
            assert_eq!(attempts, 2);
            assert!(last_score > 0.0 && last_score < 1.0);
        }
        other => panic!("expected health timeout, got {other:?}"),
    }
    let attempts = sink
        .events()
        .iter()
        .filter(|e| matches!(e, DeployEvent::HealthAttempt { ready: false, .. }))
        .count();
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn stopped_service_fails_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    write_env_file(&config);
    let inventory = three_services();
    let strategy = all_running();
    strategy.running.lock().unwrap().remove("worker");
    let host = FakeHost::default();
    let probe = FakeProbe::ok();

    let score = HealthVerifier::new(ProbeContext {
        config: &config,
        inventory: &inventory,
        strategy: &strategy,
        host: &host,
        endpoint: &probe,
    })
    .evaluate()
    .await;

    assert!(!score.ready);
    let failed: Vec<_> = score.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].dimension, Dimension::Liveness);
    assert!(failed[0].detail.contains("worker"));
}

#[tokio::test]
async fn endpoint_fails_when_no_service_serves_http() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    write_env_file(&config);
    let inventory = Inventory::from_yaml(
        r#"
- name: worker
  rank: 1
  probe: { kind: process }
  activation:
    container: { image: "ghcr.io/acme/worker:1.0" }
"#,
    )
    .unwrap();
    let strategy = all_running();
    let host = FakeHost::default();
    let probe = FakeProbe::ok();

    let score = HealthVerifier::new(ProbeContext {
        config: &config,
        inventory: &inventory,
        strategy: &strategy,
        host: &host,
        endpoint: &probe,
    })
    .evaluate()
    .await;

    assert!(!score.ready, "nothing answered, so readiness cannot be claimed");
    let failed: Vec<_> = score.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].dimension, Dimension::Endpoint);
    assert!(failed[0].detail.contains("no service exposes"));
}

#[tokio::test]
async fn log_error_limit_applies_to_the_sum_across_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["health.max_log_errors=1"]);
    write_env_file(&config);
    let inventory = three_services();
    let mut strategy = all_running();
    // One error each stays under a per-service limit of one but not the total.
    strategy
        .logs
        .insert("api".to_string(), vec!["ERROR upstream refused".to_string()]);
    strategy
        .logs
        .insert("web".to_string(), vec!["fatal: cannot bind".to_string()]);
    let host = FakeHost::default();
    let probe = FakeProbe::ok();

    let score = HealthVerifier::new(ProbeContext {
        config: &config,
        inventory: &inventory,
        strategy: &strategy,
        host: &host,
        endpoint: &probe,
    })
    .evaluate()
    .await;

    let failed: Vec<_> = score.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].dimension, Dimension::LogErrors);
    assert!(failed[0].detail.starts_with("2 error line(s)"));
}
