// ABOUTME: Rollback log: reversible actions recorded as data and replayed LIFO.
// ABOUTME: Replay continues past failures and reports what needs manual intervention.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::host::{CommandRunner, CommandSpec};

/// The reverse of one forward action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndoAction {
    /// Forward action is kept on rollback (e.g. a shared system package).
    Noop,
    RemoveFile {
        path: PathBuf,
    },
    RestoreFile {
        path: PathBuf,
        contents: String,
        mode: u32,
    },
    /// Remove a directory that the run created.
    RemoveDir {
        path: PathBuf,
    },
    RunCommand {
        program: String,
        args: Vec<String>,
    },
    RemoveContainer {
        name: String,
    },
    /// Remove `name` and put `previous` back under that name.
    RestoreContainer {
        name: String,
        previous: String,
    },
    RemoveNetwork {
        name: String,
    },
    DisableUnit {
        unit: String,
        unit_file: PathBuf,
    },
    RestoreUnit {
        unit: String,
        unit_file: PathBuf,
        previous_contents: String,
    },
}

impl UndoAction {
    /// Actions only the activation strategy knows how to reverse.
    pub fn is_strategy_action(&self) -> bool {
        matches!(
            self,
            UndoAction::RemoveContainer { .. }
                | UndoAction::RestoreContainer { .. }
                | UndoAction::RemoveNetwork { .. }
                | UndoAction::DisableUnit { .. }
                | UndoAction::RestoreUnit { .. }
        )
    }
}

/// A forward action already performed, paired with its reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub label: String,
    pub action: UndoAction,
}

impl RollbackStep {
    pub fn new(label: impl Into<String>, action: UndoAction) -> Self {
        RollbackStep {
            label: label.into(),
            action,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UndoError(pub String);

impl UndoError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        UndoError(message.to_string())
    }
}

/// Executes reverse actions.
#[async_trait]
pub trait Reverser: Send + Sync {
    async fn reverse(&self, action: &UndoAction) -> Result<(), UndoError>;
}

/// A step whose reverse action failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualIntervention {
    pub label: String,
    pub action: UndoAction,
    pub error: String,
}

impl std::fmt::Display for ManualIntervention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Outcome of one replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    /// Labels of replayed steps, in replay order.
    pub replayed: Vec<String>,
    pub manual: Vec<ManualIntervention>,
}

impl ReplaySummary {
    pub fn fully_restored(&self) -> bool {
        self.manual.is_empty()
    }
}

/// Append-only log of reversible actions for one run.
#[derive(Debug, Default)]
pub struct RollbackLog {
    steps: Vec<RollbackStep>,
}

impl RollbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from a persisted journal.
    pub fn from_journal(steps: Vec<RollbackStep>) -> Self {
        RollbackLog { steps }
    }

    pub fn record(&mut self, step: RollbackStep) {
        tracing::debug!(label = %step.label, "recorded rollback step");
        self.steps.push(step);
    }

    /// Drop the newest step if it carries `label`. Used when a forward
    /// action failed and already undid itself.
    pub fn withdraw(&mut self, label: &str) -> Option<RollbackStep> {
        if self.steps.last().is_some_and(|s| s.label == label) {
            tracing::debug!(label, "withdrew rollback step");
            self.steps.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[RollbackStep] {
        &self.steps
    }

    /// Pop and reverse every step, newest first.
    pub async fn replay(&mut self, reverser: &dyn Reverser) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        while let Some(step) = self.steps.pop() {
            tracing::info!(label = %step.label, "rolling back");
            if let Err(e) = reverser.reverse(&step.action).await {
                tracing::error!(label = %step.label, error = %e, "reverse action failed");
                summary.manual.push(ManualIntervention {
                    label: step.label.clone(),
                    action: step.action,
                    error: e.to_string(),
                });
            }
            summary.replayed.push(step.label);
        }
        summary
    }

    /// End a successful run without replaying.
    pub fn discard(mut self) {
        self.steps.clear();
    }

    /// End a successful run, keeping the steps as an undo journal.
    pub fn into_journal(self) -> Vec<RollbackStep> {
        self.steps
    }
}

/// Reverses host-level actions itself and hands strategy actions on.
pub struct HostReverser<'a, S: ?Sized> {
    runner: &'a dyn CommandRunner,
    strategy: &'a S,
}

impl<'a, S: Reverser + ?Sized> HostReverser<'a, S> {
    pub fn new(runner: &'a dyn CommandRunner, strategy: &'a S) -> Self {
        HostReverser { runner, strategy }
    }
}

#[async_trait]
impl<S: Reverser + ?Sized> Reverser for HostReverser<'_, S> {
    async fn reverse(&self, action: &UndoAction) -> Result<(), UndoError> {
        match action {
            UndoAction::Noop => Ok(()),
            UndoAction::RemoveFile { path } => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(UndoError(format!("remove {}: {}", path.display(), e))),
            },
            UndoAction::RestoreFile {
                path,
                contents,
                mode,
            } => {
                tokio::fs::write(path, contents)
                    .await
                    .map_err(|e| UndoError(format!("restore {}: {}", path.display(), e)))?;
                tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(*mode))
                    .await
                    .map_err(|e| UndoError(format!("chmod {}: {}", path.display(), e)))
            }
            UndoAction::RemoveDir { path } => match tokio::fs::remove_dir_all(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(UndoError(format!("remove {}: {}", path.display(), e))),
            },
            UndoAction::RunCommand { program, args } => {
                let spec = CommandSpec::new(program.clone(), args.clone());
                let output = self.runner.run(&spec).await.map_err(UndoError::new)?;
                if output.success() {
                    Ok(())
                } else {
                    Err(UndoError(format!("{}: {}", spec, output.failure_summary())))
                }
            }
            strategy_action => self.strategy.reverse(strategy_action).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<UndoAction>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl Reverser for Recorder {
        async fn reverse(&self, action: &UndoAction) -> Result<(), UndoError> {
            self.seen.lock().unwrap().push(action.clone());
            if let (Some(fail), UndoAction::RemoveContainer { name }) = (&self.fail_on, action)
                && fail == name
            {
                return Err(UndoError::new("engine unavailable"));
            }
            Ok(())
        }
    }

    fn remove(name: &str) -> RollbackStep {
        RollbackStep::new(
            format!("start {}", name),
            UndoAction::RemoveContainer {
                name: name.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn replays_newest_first_and_drains() {
        let mut log = RollbackLog::new();
        log.record(remove("a"));
        log.record(remove("b"));
        log.record(remove("c"));

        let recorder = Recorder::default();
        let summary = log.replay(&recorder).await;

        assert_eq!(summary.replayed, vec!["start c", "start b", "start a"]);
        assert!(summary.fully_restored());
        assert!(log.is_empty());
        assert_eq!(recorder.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn continues_past_failures() {
        let mut log = RollbackLog::new();
        log.record(remove("a"));
        log.record(remove("b"));
        log.record(remove("c"));

        let recorder = Recorder {
            fail_on: Some("b".to_string()),
            ..Recorder::default()
        };
        let summary = log.replay(&recorder).await;

        assert_eq!(summary.replayed.len(), 3);
        assert_eq!(summary.manual.len(), 1);
        assert_eq!(summary.manual[0].label, "start b");
        assert!(!summary.fully_restored());
    }

    #[test]
    fn withdraw_only_takes_the_newest_matching_step() {
        let mut log = RollbackLog::new();
        log.record(remove("a"));
        log.record(remove("b"));

        assert!(log.withdraw("start a").is_none());
        assert_eq!(log.withdraw("start b"), Some(remove("b")));
        assert_eq!(log.steps(), &[remove("a")]);
    }

    #[test]
    fn journal_round_trips_through_json() {
        let step = RollbackStep::new(
            "write unit",
            UndoAction::RestoreUnit {
                unit: "shipwright-console.service".to_string(),
                unit_file: PathBuf::from("/etc/systemd/system/shipwright-console.service"),
                previous_contents: "[Unit]\n".to_string(),
            },
        );
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"kind\":\"restore_unit\""));
        let back: RollbackStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }

    #[tokio::test]
    async fn host_reverser_restores_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipwright.env");
        std::fs::write(&path, "NEW=1\n").unwrap();

        let runner = crate::host::SystemCommandRunner;
        let strategy = Recorder::default();
        let reverser = HostReverser::new(&runner, &strategy);

        reverser
            .reverse(&UndoAction::RestoreFile {
                path: path.clone(),
                contents: "OLD=1\n".to_string(),
                mode: 0o600,
            })
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "OLD=1\n");

        reverser
            .reverse(&UndoAction::RemoveFile { path: path.clone() })
            .await
            .unwrap();
        assert!(!path.exists());
        // Already gone is fine.
        reverser
            .reverse(&UndoAction::RemoveFile { path })
            .await
            .unwrap();
        assert!(strategy.seen.lock().unwrap().is_empty());
    }
}
