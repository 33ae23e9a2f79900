// ABOUTME: Container engine access: capability traits, socket detection and the bollard client.
// ABOUTME: Docker and Podman are both reached through the Docker-compatible API.

mod bollard;
mod detection;
mod engine;
mod error;

pub use self::bollard::{BollardEngine, connect_local};
pub use detection::{EngineKind, EngineSocket, NoEngineFound, detect_socket};
pub use engine::*;
pub use error::RuntimeError;
