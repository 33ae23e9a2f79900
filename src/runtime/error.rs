// ABOUTME: Engine connection errors with the SNAFU pattern.
// ABOUTME: Separates "no engine on this host" from "engine did not answer".

use snafu::Snafu;

use super::detection::NoEngineFound;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RuntimeError {
    #[snafu(display("{source}"))]
    Detection { source: NoEngineFound },

    #[snafu(display("cannot reach {engine} at {socket}: {message}"))]
    Connection {
        engine: String,
        socket: String,
        message: String,
    },
}

impl RuntimeError {
    /// True when installing an engine could fix the error.
    pub fn is_missing_engine(&self) -> bool {
        matches!(self, RuntimeError::Detection { .. })
    }
}

impl From<NoEngineFound> for RuntimeError {
    fn from(source: NoEngineFound) -> Self {
        RuntimeError::Detection { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_errors_mean_a_missing_engine() {
        let err: RuntimeError = NoEngineFound {
            checked: vec!["/var/run/docker.sock".to_string()],
        }
        .into();
        assert!(err.is_missing_engine());
        assert!(err.to_string().contains("/var/run/docker.sock"));

        let err = RuntimeError::Connection {
            engine: "podman".to_string(),
            socket: "/run/podman/podman.sock".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(!err.is_missing_engine());
        assert!(err.to_string().contains("connection refused"));
    }
}
