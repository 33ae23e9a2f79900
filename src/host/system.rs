// ABOUTME: HostInspector for the local Linux host.
// ABOUTME: Reads /proc/meminfo, asks df for disk space, probes ports with real sockets.

use super::{Capacity, CommandRunner, CommandSpec, HostError, HostInspector, SystemCommandRunner};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

#[async_trait]
impl HostInspector for SystemHost {
    async fn port_available(&self, port: u16) -> bool {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(_) => true,
            // Privileged ports may be unbindable for us yet free for the service.
            Err(e) => e.kind() != ErrorKind::AddrInUse,
        }
    }

    async fn disk(&self, path: &Path) -> Result<Capacity, HostError> {
        let existing = nearest_existing(path);
        let output = SystemCommandRunner
            .run(&CommandSpec::new(
                "df",
                ["-Pk".to_string(), existing.display().to_string()],
            ))
            .await?;
        if !output.success() {
            return Err(HostError::Parse {
                what: "df".to_string(),
                detail: output.failure_summary(),
            });
        }
        parse_df(&output.stdout)
    }

    async fn memory(&self) -> Result<Capacity, HostError> {
        let content = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .map_err(|e| HostError::io("failed to read /proc/meminfo", e))?;
        parse_meminfo(&content)
    }

    async fn command_exists(&self, name: &str) -> bool {
        if name.contains('/') {
            return is_executable(Path::new(name));
        }
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| is_executable(&dir.join(name)))
    }

    async fn reachable(&self, target: &str, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }

    async fn file_mode(&self, path: &Path) -> Result<Option<u32>, HostError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.permissions().mode() & 0o7777)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::io(format!("failed to stat {}", path.display()), e)),
        }
    }
}

/// The data dir may not exist yet on a fresh host; measure its closest ancestor.
fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Parse POSIX `df -Pk` output: header, then
/// `Filesystem 1024-blocks Used Available Capacity Mounted-on`.
fn parse_df(output: &str) -> Result<Capacity, HostError> {
    let parse_err = |detail: &str| HostError::Parse {
        what: "df".to_string(),
        detail: detail.to_string(),
    };
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| parse_err("missing data line"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(parse_err(line));
    }
    let total: u64 = fields[1].parse().map_err(|_| parse_err(line))?;
    let available: u64 = fields[3].parse().map_err(|_| parse_err(line))?;
    Ok(Capacity {
        total: total * 1024,
        available: available * 1024,
    })
}

fn parse_meminfo(content: &str) -> Result<Capacity, HostError> {
    let field = |name: &str| -> Option<u64> {
        content
            .lines()
            .find_map(|l| l.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total = field("MemTotal").ok_or_else(|| HostError::Parse {
        what: "/proc/meminfo".to_string(),
        detail: "MemTotal missing".to_string(),
    })?;
    // Kernels before 3.14 lack MemAvailable.
    let available = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .unwrap_or(0);
    Ok(Capacity { total, available })
}
