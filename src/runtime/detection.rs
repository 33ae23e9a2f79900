// ABOUTME: Container engine socket detection on the local host.
// ABOUTME: Honours CONTAINER_HOST and DOCKER_HOST, then tries Podman sockets before Docker.

use serde::{Deserialize, Serialize};
use std::path::Path;

const ROOTFUL_PODMAN: &str = "/run/podman/podman.sock";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Variables the podman and docker CLIs read, in precedence order.
const HOST_ENV: [(&str, EngineKind); 2] = [
    ("CONTAINER_HOST", EngineKind::Podman),
    ("DOCKER_HOST", EngineKind::Docker),
];

/// The engine flavour behind a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Docker,
    Podman,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Docker => write!(f, "docker"),
            EngineKind::Podman => write!(f, "podman"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSocket {
    pub kind: EngineKind,
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
#[error("no container engine socket found (checked {})", .checked.join(", "))]
pub struct NoEngineFound {
    pub checked: Vec<String>,
}

/// Find the engine socket.
///
/// Order: a `unix://` value in `CONTAINER_HOST` or `DOCKER_HOST`, the
/// rootless Podman socket of the current user, rootful Podman, Docker.
pub fn detect_socket() -> Result<EngineSocket, NoEngineFound> {
    for (var, kind) in HOST_ENV {
        if let Ok(value) = std::env::var(var)
            && let Some(path) = value.strip_prefix("unix://")
        {
            return Ok(EngineSocket {
                kind,
                path: path.to_string(),
            });
        }
    }

    let mut candidates = Vec::with_capacity(3);
    if let Some(uid) = current_uid() {
        candidates.push((
            EngineKind::Podman,
            format!("/run/user/{}/podman/podman.sock", uid),
        ));
    }
    candidates.push((EngineKind::Podman, ROOTFUL_PODMAN.to_string()));
    candidates.push((EngineKind::Docker, DOCKER_SOCKET.to_string()));

    match candidates.iter().find(|(_, path)| Path::new(path).exists()) {
        Some((kind, path)) => Ok(EngineSocket {
            kind: *kind,
            path: path.clone(),
        }),
        None => Err(NoEngineFound {
            checked: candidates.into_iter().map(|(_, path)| path).collect(),
        }),
    }
}

fn current_uid() -> Option<String> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|l| l.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}
