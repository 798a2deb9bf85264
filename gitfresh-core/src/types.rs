//! Domain types shared by the CLI and the agent.
//!
//! All path fields use `PathBuf`. Everything that crosses a process boundary
//! (config file, status endpoint, webhook payload) is serde-serializable.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PushRejected;

/// Default loopback address of the agent status endpoint.
pub const DEFAULT_STATUS_ADDR: &str = "127.0.0.1:9191";

/// Prefix of the only refs a push may pull.
pub const BRANCH_PREFIX: &str = "refs/heads/";

/// Length of the abbreviated commit SHA used in logs.
const SHORT_SHA_LEN: usize = 7;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Which tunnel provider exposes the webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProviderKind {
    /// Spawn the `ngrok` agent and forward its public URL to a loopback port.
    #[default]
    Ngrok,
    /// Listen on `listen_addr` directly; `tunnel_domain` is the public URL.
    Direct,
}

impl fmt::Display for TunnelProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelProviderKind::Ngrok => write!(f, "ngrok"),
            TunnelProviderKind::Direct => write!(f, "direct"),
        }
    }
}

/// Tunnel provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSettings {
    #[serde(default)]
    pub provider: TunnelProviderKind,
    /// Local address the webhook listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// `ngrok` executable, resolved through `PATH` when relative.
    #[serde(default = "default_ngrok_bin")]
    pub ngrok_bin: PathBuf,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            provider: TunnelProviderKind::default(),
            listen_addr: default_listen_addr(),
            ngrok_bin: default_ngrok_bin(),
        }
    }
}

/// Everything the agent needs for one process run. Immutable once loaded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub tunnel_token: String,
    /// Public domain of the tunnel. Empty means "let the provider assign one".
    #[serde(default)]
    pub tunnel_domain: String,
    pub git_server_token: String,
    /// Root directory holding one clone per tracked repository.
    pub git_work_dir: PathBuf,
    /// Shared secret used to sign webhook deliveries.
    pub git_hook_secret: String,
    #[serde(default = "default_status_addr")]
    pub status_addr: SocketAddr,
    #[serde(default)]
    pub tunnel: TunnelSettings,
}

impl AgentConfig {
    /// Reject configs that can never bring an agent up.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        let invalid = |msg: &str| -> Result<(), crate::ConfigError> {
            Err(crate::ConfigError::Invalid(msg.to_string()))
        };

        if self.git_work_dir.as_os_str().is_empty() {
            return invalid("git_work_dir is empty");
        }
        match self.tunnel.provider {
            TunnelProviderKind::Ngrok if self.tunnel_token.trim().is_empty() => {
                invalid("tunnel_token is required for the ngrok provider")
            }
            TunnelProviderKind::Direct if self.tunnel_domain.trim().is_empty() => {
                invalid("tunnel_domain is required for the direct provider")
            }
            _ => Ok(()),
        }
    }

    /// `tunnel_domain` as an absolute `https://` URL, or `None` when unset.
    pub fn tunnel_url(&self) -> Option<String> {
        normalize_hook_url(&self.tunnel_domain)
    }

    /// Status endpoint URL polled by the supervisor.
    pub fn status_url(&self) -> String {
        format!("http://{}/", self.status_addr)
    }
}

impl Default for AgentConfig {
    /// Blank credentials and default addresses; not valid until filled in.
    fn default() -> Self {
        Self {
            tunnel_token: String::new(),
            tunnel_domain: String::new(),
            git_server_token: String::new(),
            git_work_dir: PathBuf::new(),
            git_hook_secret: String::new(),
            status_addr: default_status_addr(),
            tunnel: TunnelSettings::default(),
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("tunnel_token", &redact(&self.tunnel_token))
            .field("tunnel_domain", &self.tunnel_domain)
            .field("git_server_token", &redact(&self.git_server_token))
            .field("git_work_dir", &self.git_work_dir)
            .field("git_hook_secret", &redact(&self.git_hook_secret))
            .field("status_addr", &self.status_addr)
            .field("tunnel", &self.tunnel)
            .finish()
    }
}

/// Prefix a bare domain with `https://`. Returns `None` for blank input.
pub fn normalize_hook_url(domain: &str) -> Option<String> {
    let domain = domain.trim();
    if domain.is_empty() {
        return None;
    }
    if domain.starts_with("https://") || domain.starts_with("http://") {
        Some(domain.to_string())
    } else {
        Some(format!("https://{domain}"))
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

fn default_status_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9191))
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn default_ngrok_bin() -> PathBuf {
    PathBuf::from("ngrok")
}

// ---------------------------------------------------------------------------
// Agent status
// ---------------------------------------------------------------------------

/// Body served by the agent status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub api_version: String,
    pub tunnel_domain: String,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// Repository section of a push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub name: String,
}

/// The part of a push event the agent acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: RepositoryRef,
    /// Head commit after the push.
    pub after: String,
}

impl WebhookEvent {
    /// Abbreviated `after` SHA for logs.
    pub fn short_sha(&self) -> &str {
        self.after.get(..SHORT_SHA_LEN).unwrap_or(&self.after)
    }
}

/// One `git pull` to run in `workdir/repository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullJob {
    pub workdir: PathBuf,
    pub repository: String,
    pub branch: String,
}

impl PullJob {
    /// Build the pull for a push, rejecting refs that are not branches and
    /// repository names that would leave `workdir`.
    pub fn from_event(workdir: PathBuf, event: &WebhookEvent) -> Result<Self, PushRejected> {
        let branch = &event.git_ref;
        match branch.strip_prefix(BRANCH_PREFIX) {
            Some(name) if !name.is_empty() && !name.starts_with('-') => {}
            _ => return Err(PushRejected::NotABranch(branch.clone())),
        }

        let name = &event.repository.name;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(PushRejected::InvalidRepositoryName(name.clone()));
        }

        Ok(Self {
            workdir,
            repository: name.clone(),
            branch: branch.clone(),
        })
    }

    /// Directory the pull runs in.
    pub fn checkout_dir(&self) -> PathBuf {
        self.workdir.join(&self.repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> AgentConfig {
        AgentConfig {
            tunnel_token: "tok".into(),
            tunnel_domain: String::new(),
            git_server_token: "ghp".into(),
            git_work_dir: PathBuf::from("/code"),
            git_hook_secret: "s3cret".into(),
            status_addr: default_status_addr(),
            tunnel: TunnelSettings::default(),
        }
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("ghp"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let json = r#"{
            "tunnel_token": "tok",
            "git_server_token": "ghp",
            "git_work_dir": "/code",
            "git_hook_secret": "abc"
        }"#;
        let parsed: AgentConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.tunnel_domain, "");
        assert_eq!(parsed.status_addr.to_string(), DEFAULT_STATUS_ADDR);
        assert_eq!(parsed.tunnel.provider, TunnelProviderKind::Ngrok);
        assert_eq!(parsed.tunnel.listen_addr.port(), 0);
    }

    #[test]
    fn default_config_fails_validation() {
        let err = AgentConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("git_work_dir"));
    }

    #[test]
    fn direct_provider_requires_domain() {
        let mut cfg = config();
        cfg.tunnel.provider = TunnelProviderKind::Direct;
        assert!(cfg.validate().is_err());
        cfg.tunnel_domain = "hooks.example.test".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn ngrok_provider_requires_token() {
        let mut cfg = config();
        cfg.tunnel_token = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tunnel_token"));
    }

    #[test]
    fn push_payload_uses_ref_key() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"ref":"refs/heads/main","repository":{"name":"demo"},"after":"abc1234def"}"#,
        )
        .expect("parse");
        assert_eq!(event.git_ref, "refs/heads/main");
        assert_eq!(event.short_sha(), "abc1234");

        let job = PullJob::from_event(PathBuf::from("/code"), &event).expect("valid push");
        assert_eq!(job.checkout_dir(), PathBuf::from("/code/demo"));
        assert_eq!(job.branch, "refs/heads/main");
    }

    #[test]
    fn short_sha_tolerates_short_values() {
        let event = WebhookEvent {
            git_ref: "refs/heads/x".into(),
            repository: RepositoryRef { name: "r".into() },
            after: "abc".into(),
        };
        assert_eq!(event.short_sha(), "abc");
    }

    #[rstest]
    #[case("yak.ngrok-free.app", Some("https://yak.ngrok-free.app"))]
    #[case(" yak.ngrok-free.app\n", Some("https://yak.ngrok-free.app"))]
    #[case("https://yak.ngrok-free.app", Some("https://yak.ngrok-free.app"))]
    #[case("http://127.0.0.1:8080", Some("http://127.0.0.1:8080"))]
    #[case("  ", None)]
    fn hook_url_gets_https_prefix(#[case] domain: &str, #[case] expected: Option<&str>) {
        assert_eq!(normalize_hook_url(domain).as_deref(), expected);
    }

    fn push(git_ref: &str, name: &str) -> WebhookEvent {
        WebhookEvent {
            git_ref: git_ref.into(),
            repository: RepositoryRef { name: name.into() },
            after: "abc1234".into(),
        }
    }

    #[rstest]
    #[case("--upload-pack=touch /tmp/x")]
    #[case("refs/tags/v1.0")]
    #[case("refs/heads/")]
    #[case("refs/heads/-evil")]
    #[case("main")]
    fn pull_rejects_refs_that_are_not_branches(#[case] git_ref: &str) {
        let err = PullJob::from_event(PathBuf::from("/code"), &push(git_ref, "demo")).unwrap_err();
        assert_eq!(err, PushRejected::NotABranch(git_ref.into()));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("../../etc")]
    #[case("nested/repo")]
    #[case("..\\windows")]
    fn pull_rejects_names_outside_the_work_dir(#[case] name: &str) {
        let err =
            PullJob::from_event(PathBuf::from("/code"), &push("refs/heads/main", name)).unwrap_err();
        assert_eq!(err, PushRejected::InvalidRepositoryName(name.into()));
    }

    #[test]
    fn pull_accepts_nested_branch_names() {
        let job = PullJob::from_event(PathBuf::from("/code"), &push("refs/heads/feature/x", "demo.rs"))
            .expect("valid push");
        assert_eq!(job.branch, "refs/heads/feature/x");
        assert_eq!(job.checkout_dir(), PathBuf::from("/code/demo.rs"));
    }
}
