//! Error types for gitfresh-core.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// All errors that can arise from config store operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (save path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.gitfresh/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}; run `gitfresh config` first")]
    ConfigNotFound { path: PathBuf },

    /// The config parsed but cannot drive an agent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures of the `git` collaborator.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run {program} in {dir}: {source}")]
    Spawn {
        program: PathBuf,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {args}` in {dir} exited with {status}: {stderr}")]
    Failed {
        args: String,
        dir: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
}

/// Push payload fields that cannot safely become a `git pull`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushRejected {
    #[error("ref {0:?} is not a branch (expected refs/heads/...)")]
    NotABranch(String),

    #[error("repository name {0:?} is not a single directory name")]
    InvalidRepositoryName(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
