// ABOUTME: End-to-end tests of the deployment driver against in-memory host fakes.
// ABOUTME: Covers success, failure with rollback, lock contention and explicit rollback.

mod support;

use tokio_util::sync::CancellationToken;

use shipwright::deploy::{
    DeployError, DeployErrorKind, DeployLock, DeploymentRecord, Driver, LockInfo, Phase,
    PhaseStatus,
};
use shipwright::events::DeployEvent;
use shipwright::preflight::InstallMode;
use support::{FakeStrategy, Rig, requirement, test_config, test_sources, three_services};

#[tokio::test]
async fn successful_run_records_the_deployment() {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::default());
    let driver = Driver::new(rig.seams(), CancellationToken::new());

    let report = driver
        .deploy(&test_sources(dir.path(), &[]), three_services(), false)
        .await;

    assert!(report.succeeded(), "{:?}", report.error);
    assert_eq!(report.outcome, Phase::Succeeded);
    assert_eq!(report.install_mode, Some(InstallMode::Fresh));
    assert_eq!(report.services.len(), 3);
    assert!(report.health.is_some());
    assert!(report.rollback.is_none());
    let phases: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Resolving,
            Phase::PreflightChecking,
            Phase::InstallingDependencies,
            Phase::Executing,
            Phase::VerifyingHealth,
        ]
    );
    assert!(report.phases.iter().all(|p| p.status == PhaseStatus::Succeeded));

    let state_dir = dir.path().join("state");
    let record = DeploymentRecord::load(&state_dir).unwrap().unwrap();
    assert_eq!(record.services.len(), 3);
    assert!(!record.journal.is_empty());
    assert!(!LockInfo::lock_path(&state_dir).exists(), "lock released");

    let events = rig.sink.events();
    assert!(matches!(
        events.last(),
        Some(DeployEvent::Finished {
            outcome: Phase::Succeeded,
            ..
        })
    ));
}

#[tokio::test]
async fn failure_at_rank_two_rolls_back_rank_one() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::failing_on("web"));
    let driver = Driver::new(rig.seams(), CancellationToken::new());

    let report = driver
        .deploy(&test_sources(dir.path(), &[]), three_services(), false)
        .await;

    assert_eq!(report.outcome, Phase::Failed);
    assert_eq!(report.failed_phase, Some(Phase::Executing));
    assert_eq!(
        report.error.as_ref().map(|e| e.kind),
        Some(DeployErrorKind::ExecutionFailed)
    );
    assert_eq!(rig.strategy.activated(), vec!["api"]);
    assert_eq!(rig.strategy.reversed(), vec!["api"]);
    assert!(rig.strategy.running().is_empty());

    let rollback = report.rollback.as_ref().unwrap();
    assert!(rollback.fully_restored);
    // Only api got as far as activation. The remaining steps are
    // infrastructure: the env file and the data dir.
    let activations: Vec<&String> = rollback
        .replayed
        .iter()
        .filter(|label| label.starts_with("activate "))
        .collect();
    assert_eq!(activations, vec!["activate api"]);
    assert!(report.fully_restored());

    // Created by this run, so removed again.
    assert!(!dir.path().join("data").exists());
    assert!(DeploymentRecord::load(&dir.path().join("state")).unwrap().is_none());

    let failed = rig
        .sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, DeployEvent::PhaseFailed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn execute_timeout_reverses_the_service_caught_mid_activation() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::hanging_on("web"));
    let driver = Driver::new(rig.seams(), CancellationToken::new());

    let report = driver
        .deploy(
            &test_sources(dir.path(), &["timeouts.execute=200ms"]),
            three_services(),
            false,
        )
        .await;

    assert_eq!(report.failed_phase, Some(Phase::Executing));
    assert_eq!(
        report.error.as_ref().map(|e| e.kind),
        Some(DeployErrorKind::PhaseTimeout)
    );
    assert_eq!(rig.strategy.activated(), vec!["api", "web"]);
    // web never returned from activation but its step was already logged.
    assert_eq!(rig.strategy.reversed(), vec!["web", "api"]);
    assert!(rig.strategy.running().is_empty());
    assert!(report.fully_restored());
}

#[tokio::test]
async fn cancel_during_execution_reverses_the_in_flight_service() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::hanging_on("web"));
    let cancel = CancellationToken::new();
    let driver = Driver::new(rig.seams(), cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let report = driver
        .deploy(&test_sources(dir.path(), &[]), three_services(), false)
        .await;

    assert_eq!(report.failed_phase, Some(Phase::Executing));
    assert_eq!(
        report.error.as_ref().map(|e| e.kind),
        Some(DeployErrorKind::Cancelled)
    );
    assert_eq!(rig.strategy.reversed(), vec!["web", "api"]);
    assert!(rig.strategy.running().is_empty());
    let rollback = report.rollback.as_ref().unwrap();
    assert!(rollback.fully_restored);
    assert!(rollback.replayed.contains(&"activate web".to_string()));
}

#[tokio::test]
async fn failed_install_removes_what_was_installed() {
    let dir = tempfile::tempdir().unwrap();
    let strategy = FakeStrategy {
        requirements: vec![requirement("engine"), requirement("missing")],
        ..FakeStrategy::default()
    };
    let mut rig = Rig::new(strategy);
    rig.runner.failing.insert("install".to_string());
    rig.runner.installed.lock().unwrap().insert("engine".to_string());
    let driver = Driver::new(rig.seams(), CancellationToken::new());

    let report = driver
        .deploy(&test_sources(dir.path(), &[]), three_services(), false)
        .await;

    assert_eq!(report.failed_phase, Some(Phase::InstallingDependencies));
    assert!(report.fully_restored());
    assert!(rig.runner.installed.lock().unwrap().contains("engine"));
    assert!(rig.strategy.activated().is_empty());
}

#[tokio::test]
async fn held_lock_fails_preflight_without_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");
    let _held = DeployLock::acquire(&state_dir, "deploy", false).unwrap();
    let rig = Rig::new(FakeStrategy::default());
    let driver = Driver::new(rig.seams(), CancellationToken::new());

    let report = driver
        .deploy(&test_sources(dir.path(), &[]), three_services(), false)
        .await;

    assert_eq!(report.failed_phase, Some(Phase::PreflightChecking));
    assert_eq!(
        report.error.as_ref().map(|e| e.kind),
        Some(DeployErrorKind::Locked)
    );
    assert!(report.rollback.is_none());
    assert!(rig.strategy.activated().is_empty());
    assert!(LockInfo::lock_path(&state_dir).exists(), "foreign lock left alone");
}

#[tokio::test]
async fn invalid_config_fails_while_resolving() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::default());
    let driver = Driver::new(rig.seams(), CancellationToken::new());

    let report = driver
        .deploy(&test_sources(dir.path(), &["ports.api=80"]), three_services(), false)
        .await;

    assert_eq!(report.failed_phase, Some(Phase::Resolving));
    assert_eq!(
        report.error.as_ref().map(|e| e.kind),
        Some(DeployErrorKind::ConfigInvalid)
    );
    assert!(!dir.path().join("state").exists());
}

#[tokio::test]
async fn cancelled_run_stops_before_touching_the_host() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let driver = Driver::new(rig.seams(), cancel);

    let report = driver
        .deploy(&test_sources(dir.path(), &[]), three_services(), false)
        .await;

    assert_eq!(
        report.error.as_ref().map(|e| e.kind),
        Some(DeployErrorKind::Cancelled)
    );
    assert!(rig.strategy.activated().is_empty());
}

#[tokio::test]
async fn explicit_rollback_tears_down_and_forgets_the_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::default());
    let driver = Driver::new(rig.seams(), CancellationToken::new());
    let report = driver
        .deploy(&test_sources(dir.path(), &[]), three_services(), false)
        .await;
    assert!(report.succeeded());

    let config = test_config(dir.path(), &[]);
    let summary = driver.rollback(&config, false).await.unwrap();

    assert!(summary.fully_restored);
    assert_eq!(rig.strategy.reversed(), vec!["worker", "web", "api"]);
    assert!(DeploymentRecord::load(&config.paths.state_dir).unwrap().is_none());
    assert!(!config.paths.data_dir.exists());

    let err = driver.rollback(&config, false).await.unwrap_err();
    assert!(matches!(err, DeployError::NotDeployed));
}

#[tokio::test]
async fn redeploy_keeps_previous_generation() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(FakeStrategy::default());
    let driver = Driver::new(rig.seams(), CancellationToken::new());
    let sources = test_sources(dir.path(), &[]);

    assert!(driver.deploy(&sources, three_services(), false).await.succeeded());
    let second = driver.deploy(&sources, three_services(), false).await;
    assert!(second.succeeded(), "{:?}", second.error);
    assert_eq!(second.install_mode, Some(InstallMode::Upgrade));

    let config = test_config(dir.path(), &[]);
    let record = DeploymentRecord::require(&config.paths.state_dir).unwrap();
    assert!(record.previous.is_some());

    driver.rollback(&config, false).await.unwrap();
    let restored = DeploymentRecord::require(&config.paths.state_dir).unwrap();
    assert!(restored.previous.is_none());
}
