// ABOUTME: Integration tests for the deployment executor.
// ABOUTME: Services activate in rank order and a failure stops every later rank.

mod support;

use std::os::unix::fs::PermissionsExt;
use tokio_util::sync::CancellationToken;

use shipwright::deploy::{DeployError, DeploymentExecutor, RollbackLog, UndoAction};
use support::{FakeStrategy, RecordingSink, test_config, three_services};

#[tokio::test]
async fn activates_in_rank_order_and_records_each_step() {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    std::fs::create_dir_all(&config.paths.data_dir).unwrap();
    let strategy = FakeStrategy::default();
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let mut log = RollbackLog::new();

    let deployed = DeploymentExecutor::new(&strategy, &sink, &cancel)
        .execute(&config, &three_services(), &mut log)
        .await
        .unwrap();

    assert_eq!(strategy.activated(), vec!["api", "web", "worker"]);
    let ranks: Vec<u32> = deployed.iter().map(|s| s.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    assert_eq!(
        deployed[1].ports,
        vec![config.ports.http.unwrap(), config.ports.https.unwrap()]
    );

    // Env file first, then one step per service.
    assert_eq!(log.len(), 4);
    assert!(matches!(log.steps()[0].action, UndoAction::RemoveFile { .. }));
    let mode = std::fs::metadata(config.paths.env_file())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn failure_at_rank_two_leaves_rank_three_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    std::fs::create_dir_all(&config.paths.data_dir).unwrap();
    let strategy = FakeStrategy::failing_on("web");
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let mut log = RollbackLog::new();

    let err = DeploymentExecutor::new(&strategy, &sink, &cancel)
        .execute(&config, &three_services(), &mut log)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::ExecutionFailed { ref service, .. } if service == "web"));
    assert_eq!(strategy.activated(), vec!["api"]);
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn unchanged_env_file_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    std::fs::create_dir_all(&config.paths.data_dir).unwrap();
    let strategy = FakeStrategy::default();
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();

    let mut first = RollbackLog::new();
    DeploymentExecutor::new(&strategy, &sink, &cancel)
        .execute(&config, &three_services(), &mut first)
        .await
        .unwrap();

    let mut second = RollbackLog::new();
    DeploymentExecutor::new(&strategy, &sink, &cancel)
        .execute(&config, &three_services(), &mut second)
        .await
        .unwrap();
    assert_eq!(second.len(), 3, "only the service activations");
}

#[tokio::test]
async fn cancelled_run_activates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    std::fs::create_dir_all(&config.paths.data_dir).unwrap();
    let strategy = FakeStrategy::default();
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = DeploymentExecutor::new(&strategy, &sink, &cancel)
        .execute(&config, &three_services(), &mut RollbackLog::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Cancelled { .. }));
    assert!(strategy.activated().is_empty());
}
