//! Size-based rotation of the agent's redirected output.
//!
//! `agent.log` and `agent-err.log` are appended to by every agent launch, so
//! the supervisor rotates them right before spawning a new agent:
//! `agent.log` → `agent.log.1` → … → `agent.log.5`, oldest dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gitfresh_core::paths;

/// Rotate once a log grows past 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept per log.
pub const MAX_ROTATED_FILES: usize = 5;

/// Shift `log_path` into its numbered backups if it is at least `max_bytes`.
///
/// Returns whether a rotation happened. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let from = numbered_path(log_path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

/// Rotate both agent logs under `home`. Failures are logged and skipped.
pub fn rotate_agent_logs(home: &Path) {
    for log_path in [paths::stdout_log_path(home), paths::stderr_log_path(home)] {
        match rotate_if_needed(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %log_path.display(), "agent log rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "agent log rotation failed")
            }
        }
    }
}

/// `agent.log` + `3` → `agent.log.3`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}
