// ABOUTME: CommandRunner backed by tokio::process.
// ABOUTME: Children are killed when their future is dropped, so phase timeouts reap them.

use super::{CommandOutput, CommandRunner, CommandSpec, HostError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, HostError> {
        tracing::debug!(command = %spec, "running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|source| HostError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            tracing::debug!(command = %spec, status = ?result.code, "command failed");
        }
        Ok(result)
    }
}
