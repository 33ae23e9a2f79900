// ABOUTME: Idempotent dependency installation and data directory preparation.
// ABOUTME: Probes before acting; only actions it actually performs get an undo step.

use std::path::{Path, PathBuf};

use super::DeployError;
use super::rollback::{RollbackLog, RollbackStep, UndoAction};
use crate::events::{DeployEvent, EventSink};
use crate::host::{CommandRunner, CommandSpec};

/// What happens to an installed requirement on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Left in place; shared system software.
    Keep,
    Command(CommandSpec),
}

/// A host prerequisite of an activation strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    /// Exits zero when the requirement is already satisfied.
    pub probe: CommandSpec,
    /// `None` when it cannot be installed automatically.
    pub install: Option<CommandSpec>,
    pub removal: Removal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub installed: Vec<String>,
    pub already_present: Vec<String>,
    pub created_data_dir: bool,
}

pub struct DependencyInstaller<'a> {
    runner: &'a dyn CommandRunner,
    events: &'a dyn EventSink,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(runner: &'a dyn CommandRunner, events: &'a dyn EventSink) -> Self {
        DependencyInstaller { runner, events }
    }

    /// Ensure the data dir and every requirement; stop at the first failure.
    pub async fn install(
        &self,
        requirements: &[Requirement],
        data_dir: &Path,
        log: &mut RollbackLog,
    ) -> Result<InstallSummary, DeployError> {
        let mut summary = InstallSummary {
            created_data_dir: prepare_dir(data_dir, log).await?,
            ..InstallSummary::default()
        };

        for requirement in requirements {
            if self.present(requirement).await {
                tracing::debug!(requirement = %requirement.name, "already present");
                self.events.emit(&DeployEvent::RequirementSatisfied {
                    name: requirement.name.clone(),
                });
                summary.already_present.push(requirement.name.clone());
                continue;
            }

            self.install_one(requirement).await?;
            log.record(undo_step(requirement));
            tracing::info!(requirement = %requirement.name, "installed");
            self.events.emit(&DeployEvent::RequirementInstalled {
                name: requirement.name.clone(),
            });
            summary.installed.push(requirement.name.clone());
        }
        Ok(summary)
    }

    async fn present(&self, requirement: &Requirement) -> bool {
        match self.runner.run(&requirement.probe).await {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::debug!(requirement = %requirement.name, error = %e, "probe could not run");
                false
            }
        }
    }

    async fn install_one(&self, requirement: &Requirement) -> Result<(), DeployError> {
        let failed = |cause: String| DeployError::DependencyInstallFailed {
            name: requirement.name.clone(),
            cause,
        };

        let Some(install) = &requirement.install else {
            return Err(failed("missing and cannot be installed automatically".to_string()));
        };

        let output = self
            .runner
            .run(install)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !output.success() {
            return Err(failed(format!("{}: {}", install, output.failure_summary())));
        }
        if !self.present(requirement).await {
            return Err(failed("still missing after install".to_string()));
        }
        Ok(())
    }
}

fn undo_step(requirement: &Requirement) -> RollbackStep {
    let action = match &requirement.removal {
        Removal::Keep => UndoAction::Noop,
        Removal::Command(spec) => UndoAction::RunCommand {
            program: spec.program.clone(),
            args: spec.args.clone(),
        },
    };
    RollbackStep::new(format!("install {}", requirement.name), action)
}

/// Create `dir` if missing; the undo removes the topmost directory created.
async fn prepare_dir(dir: &Path, log: &mut RollbackLog) -> Result<bool, DeployError> {
    if dir.is_dir() {
        return Ok(false);
    }
    let topmost = topmost_missing(dir);
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DeployError::DependencyInstallFailed {
            name: "data directory".to_string(),
            cause: format!("create {}: {}", dir.display(), e),
        })?;
    log.record(RollbackStep::new(
        format!("create {}", topmost.display()),
        UndoAction::RemoveDir { path: topmost },
    ));
    Ok(true)
}

fn topmost_missing(dir: &Path) -> PathBuf {
    let mut topmost = dir.to_path_buf();
    let mut current = dir.parent();
    while let Some(parent) = current {
        if parent.exists() {
            break;
        }
        topmost = parent.to_path_buf();
        current = parent.parent();
    }
    topmost
}
