//! `gitfresh init`: first-time setup after `gitfresh config`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use gitfresh_core::config::load_config_at;

use super::agent::{print_started, supervisor};
use super::home;
use super::scan::register_all;

#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self, agent_bin: Option<PathBuf>) -> Result<()> {
        let home = home()?;
        let config = load_config_at(&home).context("failed to load config")?;
        config.validate().context("config is incomplete")?;

        println!("{} Starting agent", "→".cyan().bold());
        let (outcome, status) = supervisor(&home, &config, agent_bin)?
            .ensure_ready()
            .context("agent did not become ready")?;
        print_started(outcome, &status);

        // Hooks target the URL the agent serves, which the provider may have assigned.
        register_all(&home, &config, &status.tunnel_domain)?;
        println!("Run `gitfresh agent logs` to follow incoming pushes.");
        Ok(())
    }
}
