use std::path::PathBuf;

use thiserror::Error;

/// Errors from discovery, webhook registration and the tracked-repository store.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] gitfresh_core::ConfigError),

    #[error("cannot register a webhook without a tunnel domain")]
    MissingHookUrl,

    #[error("creating webhook for {repository}: HTTP {status}: {message}")]
    HookRejected {
        repository: String,
        status: u16,
        message: String,
    },

    #[error("creating webhook for {repository}: {message}")]
    HookTransport { repository: String, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RepoError {
    RepoError::Io {
        path: path.into(),
        source,
    }
}
