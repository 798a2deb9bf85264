//! Discovery of clones under the work directory.

use std::fmt;
use std::fs;
use std::path::Path;

use gitfresh_core::GitExecutor;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, RepoError};

/// Git hosting provider whose remotes are recognised.
pub const DEFAULT_HOST: &str = "github.com";

/// A repository on the hosting provider, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Web page listing the repository's webhooks.
    pub fn hooks_page(&self, host: &str) -> String {
        format!("https://{host}/{}/{}/settings/hooks", self.owner, self.name)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Every direct subdirectory of `workdir` whose `origin` points at `host`.
///
/// Directories that are not clones, or whose remote lives elsewhere, are
/// logged and skipped. Only an unreadable `workdir` is an error.
pub fn scan_repositories(
    workdir: &Path,
    host: &str,
    git: &impl GitExecutor,
) -> Result<Vec<Repository>, RepoError> {
    let entries = fs::read_dir(workdir).map_err(|e| io_err(workdir, e))?;

    let mut repos = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(workdir, e))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let url = match git.remote_url(&dir) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "skipping directory without origin");
                continue;
            }
        };
        match parse_remote(&url, host) {
            Some(repo) => {
                tracing::info!(dir = %dir.display(), repository = %repo, "found repository");
                repos.push(repo);
            }
            None => tracing::warn!(dir = %dir.display(), url = %url, host, "remote not on provider"),
        }
    }

    repos.sort();
    Ok(repos)
}

/// Parse an `origin` URL into a [`Repository`] if it is hosted on `host`.
///
/// Understands `https://host/owner/name(.git)`, `ssh://git@host/owner/name.git`
/// and the scp-like `git@host:owner/name.git`.
pub fn parse_remote(url: &str, host: &str) -> Option<Repository> {
    let url = url.trim();
    let scheme_less = ["https://", "http://", "ssh://", "git://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme));

    let (authority, path) = match scheme_less {
        Some(rest) => rest.split_once('/')?,
        None => {
            let (authority, path) = url.split_once(':')?;
            if authority.contains('/') {
                return None;
            }
            (authority, path)
        }
    };

    let remote_host = authority.rsplit('@').next()?;
    let remote_host = remote_host.split(':').next()?;
    if !remote_host.eq_ignore_ascii_case(host) {
        return None;
    }

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Some(Repository::new(owner, name))
        }
        _ => None,
    }
}
