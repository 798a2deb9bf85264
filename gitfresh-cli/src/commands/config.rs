//! `gitfresh config`: write `~/.gitfresh/config.json`.
//!
//! Flags update the existing config in place; omitted flags keep their
//! current value. The webhook secret is generated once and then preserved.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use gitfresh_core::config::{generate_hook_secret, load_config_at, save_config_at};
use gitfresh_core::{AgentConfig, ConfigError};

use super::home;
use crate::ProviderArg;

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Auth token of the tunnel provider.
    #[arg(long)]
    pub tunnel_token: Option<String>,

    /// Public domain of the tunnel. Empty lets the provider assign one.
    #[arg(long)]
    pub tunnel_domain: Option<String>,

    /// GitHub token allowed to create repository webhooks.
    #[arg(long)]
    pub git_server_token: Option<String>,

    /// Directory holding one clone per repository.
    #[arg(long, value_name = "DIR")]
    pub git_work_dir: Option<PathBuf>,

    /// Tunnel provider: ngrok | direct.
    #[arg(long, value_name = "PROVIDER")]
    pub tunnel_provider: Option<ProviderArg>,

    /// Local address the webhook listener binds.
    #[arg(long, value_name = "ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// Loopback address of the agent status endpoint.
    #[arg(long, value_name = "ADDR")]
    pub status_addr: Option<SocketAddr>,

    /// Path to the ngrok executable.
    #[arg(long, value_name = "PATH")]
    pub ngrok_bin: Option<PathBuf>,

    /// Replace the webhook secret with a freshly generated one.
    #[arg(long)]
    pub rotate_secret: bool,

    /// Print the current config (secrets redacted) and exit.
    #[arg(long, conflicts_with_all = ["tunnel_token", "git_server_token", "rotate_secret"])]
    pub show: bool,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;

        if self.show {
            let config = load_config_at(&home).context("failed to load config")?;
            println!("{config:#?}");
            return Ok(());
        }

        let existing = match load_config_at(&home) {
            Ok(config) => Some(config),
            Err(ConfigError::ConfigNotFound { .. }) => None,
            Err(err) => return Err(err).context("failed to read existing config"),
        };
        let created = existing.is_none();
        let config = self.apply(existing.unwrap_or_default())?;
        config.validate().context("config not saved")?;

        let path = save_config_at(&home, &config).context("failed to save config")?;
        let verb = if created { "Created" } else { "Updated" };
        println!("{} {verb} {}", "✓".green().bold(), path.display());
        if created {
            println!("  Next: run `gitfresh init` to start the agent and register webhooks.");
        }
        Ok(())
    }

    fn apply(self, mut config: AgentConfig) -> Result<AgentConfig> {
        if let Some(token) = self.tunnel_token {
            config.tunnel_token = token;
        }
        if let Some(domain) = self.tunnel_domain {
            config.tunnel_domain = domain.trim().to_string();
        }
        if let Some(token) = self.git_server_token {
            config.git_server_token = token;
        }
        if let Some(dir) = self.git_work_dir {
            config.git_work_dir = resolve_dir(&dir)?;
        }
        if let Some(provider) = self.tunnel_provider {
            config.tunnel.provider = provider.0;
        }
        if let Some(addr) = self.listen_addr {
            config.tunnel.listen_addr = addr;
        }
        if let Some(addr) = self.status_addr {
            config.status_addr = addr;
        }
        if let Some(bin) = self.ngrok_bin {
            config.tunnel.ngrok_bin = bin;
        }
        if self.rotate_secret || config.git_hook_secret.is_empty() {
            config.git_hook_secret = generate_hook_secret();
        }
        Ok(config)
    }
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    let resolved = dir
        .canonicalize()
        .with_context(|| format!("cannot resolve work dir '{}'", dir.display()))?;
    anyhow::ensure!(
        resolved.is_dir(),
        "work dir '{}' is not a directory",
        resolved.display()
    );
    Ok(resolved)
}
