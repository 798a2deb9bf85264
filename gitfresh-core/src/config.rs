//! Config store for `~/.gitfresh/config.json`.
//!
//! # Storage layout
//!
//! ```text
//! ~/.gitfresh/            (mode 0700)
//!   config.json           (mode 0600, JSON AgentConfig)
//!   repositories.json     (tracked repositories, see gitfresh-repos)
//!   agent.pid             (PID of the running agent)
//!   logs/agent.log        (agent stdout, JSON tracing)
//!   logs/agent-err.log    (agent stderr)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{io_err, ConfigError};
use crate::paths::{config_path, gitfresh_root};
use crate::types::AgentConfig;

/// Length of generated webhook secrets.
pub const HOOK_SECRET_LEN: usize = 32;

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.gitfresh/config.json`.
///
/// Returns `ConfigError::ConfigNotFound` if absent and `ConfigError::Parse`
/// (with the file path) if the JSON is malformed.
pub fn load_config_at(home: &Path) -> Result<AgentConfig, ConfigError> {
    let path = config_path(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_config_at` convenience wrapper.
pub fn load_config() -> Result<AgentConfig, ConfigError> {
    load_config_at(&home()?)
}

// ---------------------------------------------------------------------------
// 2. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.gitfresh/config.json`.
///
/// Write flow: serialize → `config.json.tmp` sibling created `0600` → `rename`.
pub fn save_config_at(home: &Path, config: &AgentConfig) -> Result<PathBuf, ConfigError> {
    ensure_root_at(home)?;
    let path = config_path(home);
    let json = serde_json::to_vec_pretty(config)?;
    write_atomic(&path, &json).map_err(|e| io_err(&path, e))?;
    tracing::debug!(path = %path.display(), "config saved");
    Ok(path)
}

/// `save_config_at` convenience wrapper.
pub fn save_config(config: &AgentConfig) -> Result<PathBuf, ConfigError> {
    save_config_at(&home()?, config)
}

/// Create `<home>/.gitfresh/` (mode `0700`) if it does not exist yet.
pub fn ensure_root_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = gitfresh_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(dir)
}

/// Write `contents` to a `.tmp` sibling of `path` that is owner-only from
/// creation, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{name}.tmp"));
    // A leftover tmp file keeps its old mode; start from a fresh one.
    match std::fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    let mut file = private_file_options().open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)
}

// ---------------------------------------------------------------------------
// 3. Secrets
// ---------------------------------------------------------------------------

/// Random alphanumeric secret used to sign webhook deliveries.
pub fn generate_hook_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(HOOK_SECRET_LEN)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn private_file_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TunnelSettings;
    use tempfile::TempDir;

    fn sample() -> AgentConfig {
        AgentConfig {
            tunnel_token: "tok".into(),
            tunnel_domain: "yak.ngrok-free.app".into(),
            git_server_token: "ghp".into(),
            git_work_dir: PathBuf::from("/code"),
            git_hook_secret: generate_hook_secret(),
            status_addr: "127.0.0.1:9191".parse().expect("addr"),
            tunnel: TunnelSettings::default(),
        }
    }

    #[test]
    fn save_then_load_returns_same_config() {
        let home = TempDir::new().expect("tempdir");
        let cfg = sample();
        let path = save_config_at(home.path(), &cfg).expect("save");
        assert!(path.ends_with(".gitfresh/config.json"));
        assert_eq!(load_config_at(home.path()).expect("load"), cfg);
    }

    #[test]
    fn save_leaves_no_tmp_file() {
        let home = TempDir::new().expect("tempdir");
        let path = save_config_at(home.path(), &sample()).expect("save");
        assert!(!path.with_file_name("config.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn root_and_file_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().expect("tempdir");
        let path = save_config_at(home.path(), &sample()).expect("save");
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(gitfresh_root(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn stale_world_readable_tmp_is_not_reused() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().expect("tempdir");
        let path = home.path().join("secret.json");
        let tmp = home.path().join("secret.json.tmp");
        std::fs::write(&tmp, "stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_atomic(&path, b"{\"token\":\"x\"}").expect("write");

        assert!(!tmp.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"token\":\"x\"}");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn generated_secrets_are_alphanumeric_and_distinct() {
        let a = generate_hook_secret();
        let b = generate_hook_secret();
        assert_eq!(a.len(), HOOK_SECRET_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
