use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::probe::ProbeError;

/// Error surface for the agent runtime and its supervisor.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] gitfresh_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("tunnel error: {0}")]
    Tunnel(String),

    #[error("failed to bind {component} on {addr}: {source}")]
    Bind {
        component: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{component} stopped serving: {reason}")]
    ServeExited {
        component: &'static str,
        reason: String,
    },

    #[error("agent did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("process error: {0}")]
    Probe(#[from] ProbeError),

    #[error("invalid PID file {path}: {contents:?}")]
    InvalidPidFile { path: PathBuf, contents: String },

    #[error("agent not reachable at {url} after {attempts} attempts; check `gitfresh agent logs`")]
    NotReachable { url: String, attempts: u32 },

    #[error("agent status request failed: {0}")]
    Status(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AgentError {
    AgentError::Io {
        path: path.into(),
        source,
    }
}
