//! Repository discovery and webhook registration for gitfresh.
//!
//! `scan_repositories` finds clones under the work directory whose `origin`
//! lives on GitHub, `HookRegistrar` points a push webhook at the agent's
//! tunnel, and `store` remembers which repositories are tracked.

mod error;
pub mod hooks;
pub mod scan;
pub mod store;

pub use error::RepoError;
pub use hooks::{HookOutcome, HookRegistrar};
pub use scan::{parse_remote, scan_repositories, Repository, DEFAULT_HOST};
pub use store::{merge_tracked, TrackedRepository};
