// ABOUTME: Seams to the local host: inspection, command execution and HTTP probing.
// ABOUTME: Engine components depend on these traits; tests substitute fakes.

mod command;
mod http;
mod system;

pub use command::SystemCommandRunner;
pub use http::HttpProbe;
pub use system::SystemHost;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("unexpected output from {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("http probe failed: {0}")]
    Http(String),
}

impl HostError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HostError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Total and available bytes of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub total: u64,
    pub available: u64,
}

impl Capacity {
    /// Fraction in use, 0.0..=1.0. An empty resource counts as full.
    pub fn used_ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        let used = self.total.saturating_sub(self.available);
        used as f64 / self.total as f64
    }
}

/// Read-only questions about the host.
#[async_trait]
pub trait HostInspector: Send + Sync {
    /// Whether nothing is listening on the TCP port.
    async fn port_available(&self, port: u16) -> bool;

    /// Disk capacity of the filesystem holding `path`.
    async fn disk(&self, path: &Path) -> Result<Capacity, HostError>;

    async fn memory(&self) -> Result<Capacity, HostError>;

    /// Whether `name` resolves to an executable on `PATH`.
    async fn command_exists(&self, name: &str) -> bool;

    /// Whether a TCP connection to `target` (`host:port`) succeeds in time.
    async fn reachable(&self, target: &str, timeout: Duration) -> bool;

    /// Permission bits of `path`, `None` when it does not exist.
    async fn file_mode(&self, path: &Path) -> Result<Option<u32>, HostError>;
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description for error messages.
    pub fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        let code = self
            .code
            .map(|c| format!("exit code {}", c))
            .unwrap_or_else(|| "terminated by signal".to_string());
        if stderr.is_empty() {
            code
        } else {
            format!("{}: {}", code, stderr)
        }
    }
}

/// A command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            workdir: None,
        }
    }

    /// `sh -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        CommandSpec::new("sh", ["-c".to_string(), script.into()])
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn errors are `Err`; a non-zero exit is `Ok` with the code.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, HostError>;
}

/// HTTP GET against a local port.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Status code of `GET http://127.0.0.1:<port><path>`.
    async fn get(&self, port: u16, path: &str, timeout: Duration) -> Result<u16, HostError>;
}
