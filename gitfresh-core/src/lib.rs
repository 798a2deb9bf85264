//! gitfresh core library: domain types, config store, app paths, git collaborator.
//!
//! - [`types`]: config, status and webhook payload types
//! - [`config`]: load / save `~/.gitfresh/config.json`
//! - [`paths`]: every file the CLI and the agent share
//! - [`git`]: the `git` executable behind [`git::GitExecutor`]
//! - [`error`]: [`ConfigError`], [`GitError`], [`PushRejected`]

pub mod config;
pub mod error;
pub mod git;
pub mod paths;
pub mod types;

pub use error::{ConfigError, GitError, PushRejected};
pub use git::{GitCli, GitExecutor};
pub use types::{
    AgentConfig, AgentStatus, PullJob, RepositoryRef, TunnelProviderKind, TunnelSettings,
    WebhookEvent,
};
