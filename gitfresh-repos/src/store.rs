//! `~/.gitfresh/repositories.json`: repositories with a registered webhook.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gitfresh_core::config::{ensure_root_at, home, write_atomic};
use gitfresh_core::paths::repositories_path;

use crate::error::{io_err, RepoError};
use crate::scan::Repository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRepository {
    #[serde(flatten)]
    pub repository: Repository,
    pub tracked_at: DateTime<Utc>,
}

/// Missing file → empty list.
pub fn load_repositories_at(home: &Path) -> Result<Vec<TrackedRepository>, RepoError> {
    let path = repositories_path(home);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| RepoError::Json { path, source })
}

pub fn load_repositories() -> Result<Vec<TrackedRepository>, RepoError> {
    load_repositories_at(&home()?)
}

/// Replace the stored list atomically.
pub fn save_repositories_at(
    home: &Path,
    repos: &[TrackedRepository],
) -> Result<PathBuf, RepoError> {
    ensure_root_at(home)?;
    let path = repositories_path(home);
    let json = serde_json::to_vec_pretty(repos).map_err(|source| RepoError::Json {
        path: path.clone(),
        source,
    })?;
    write_atomic(&path, &json).map_err(|e| io_err(&path, e))?;
    tracing::debug!(path = %path.display(), count = repos.len(), "repositories saved");
    Ok(path)
}

pub fn save_repositories(repos: &[TrackedRepository]) -> Result<PathBuf, RepoError> {
    save_repositories_at(&home()?, repos)
}

/// Stamp `registered` with `now`, keeping the original stamp of repositories
/// that were already tracked. Repositories no longer registered are dropped.
pub fn merge_tracked(
    existing: &[TrackedRepository],
    registered: &[Repository],
    now: DateTime<Utc>,
) -> Vec<TrackedRepository> {
    registered
        .iter()
        .map(|repo| {
            let tracked_at = existing
                .iter()
                .find(|t| &t.repository == repo)
                .map_or(now, |t| t.tracked_at);
            TrackedRepository {
                repository: repo.clone(),
                tracked_at,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let home = TempDir::new().unwrap();
        assert!(load_repositories_at(home.path()).unwrap().is_empty());
    }

    #[test]
    fn saved_list_loads_back_with_flat_fields() {
        let home = TempDir::new().unwrap();
        let repos = merge_tracked(&[], &[Repository::new("acme", "api")], at(9));
        let path = save_repositories_at(home.path(), &repos).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"owner\": \"acme\""));
        assert!(raw.contains("\"tracked_at\""));
        assert_eq!(load_repositories_at(home.path()).unwrap(), repos);
    }

    #[test]
    fn corrupt_file_reports_path() {
        let home = TempDir::new().unwrap();
        ensure_root_at(home.path()).unwrap();
        fs::write(repositories_path(home.path()), "{]").unwrap();

        let err = load_repositories_at(home.path()).unwrap_err();
        assert!(err.to_string().contains("repositories.json"), "got: {err}");
    }

    #[test]
    fn merge_keeps_first_tracked_time() {
        let api = Repository::new("acme", "api");
        let web = Repository::new("acme", "web");
        let existing = merge_tracked(&[], &[api.clone()], at(9));

        let merged = merge_tracked(&existing, &[api.clone(), web.clone()], at(12));
        assert_eq!(merged[0].tracked_at, at(9));
        assert_eq!(merged[1].tracked_at, at(12));

        let pruned = merge_tracked(&merged, &[web], at(15));
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].repository.name, "web");
    }
}
