//! Locations under `~/.gitfresh/` shared by the CLI and the agent.

use std::path::{Path, PathBuf};

pub const APP_DIR: &str = ".gitfresh";
pub const CONFIG_FILE: &str = "config.json";
pub const REPOSITORIES_FILE: &str = "repositories.json";
pub const AGENT_PID_FILE: &str = "agent.pid";

pub const AGENT_STDOUT_LOG: &str = "agent.log";
pub const AGENT_STDERR_LOG: &str = "agent-err.log";

pub fn gitfresh_root(home: &Path) -> PathBuf {
    home.join(APP_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    gitfresh_root(home).join(CONFIG_FILE)
}

pub fn repositories_path(home: &Path) -> PathBuf {
    gitfresh_root(home).join(REPOSITORIES_FILE)
}

pub fn pid_path(home: &Path) -> PathBuf {
    gitfresh_root(home).join(AGENT_PID_FILE)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    gitfresh_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(AGENT_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(AGENT_STDERR_LOG)
}
