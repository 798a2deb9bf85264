//! The `git` executable as an external collaborator.
//!
//! The agent only ever needs two operations: pull a branch into an existing
//! clone, and read a clone's `origin` URL during discovery. Both go through
//! [`GitExecutor`] so tests can substitute a fake.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::GitError;
use crate::types::PullJob;

/// Synchronous git operations. Implementations block the calling thread.
pub trait GitExecutor: Send + Sync + 'static {
    /// `git pull --end-of-options origin <branch>` inside `job.checkout_dir()`.
    fn pull(&self, job: &PullJob) -> Result<(), GitError>;

    /// `git remote get-url origin` inside `repo_dir`.
    fn remote_url(&self, repo_dir: &Path) -> Result<String, GitError>;
}

/// [`GitExecutor`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        tracing::debug!(program = %self.program.display(), dir = %dir.display(), ?args, "running git");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| GitError::Spawn {
                program: self.program.clone(),
                dir: dir.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::Failed {
                args: args.join(" "),
                dir: dir.to_path_buf(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitExecutor for GitCli {
    fn pull(&self, job: &PullJob) -> Result<(), GitError> {
        // Payload values are positional only, never options.
        self.run(
            &job.checkout_dir(),
            &["pull", "--end-of-options", "origin", &job.branch],
        )
        .map(|_| ())
    }

    fn remote_url(&self, repo_dir: &Path) -> Result<String, GitError> {
        self.run(repo_dir, &["remote", "get-url", "origin"])
    }
}
