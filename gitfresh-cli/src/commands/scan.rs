//! `gitfresh scan`: discover repositories and register their webhooks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use gitfresh_core::config::load_config_at;
use gitfresh_core::{AgentConfig, GitCli};
use gitfresh_repos::{
    merge_tracked, scan_repositories, store, HookOutcome, HookRegistrar, Repository, DEFAULT_HOST,
};

use super::agent::{print_started, supervisor};
use super::home;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Only list the repositories that would be registered.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Tabled)]
struct RepoRow {
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "webhook")]
    webhook: String,
    #[tabled(rename = "settings")]
    settings: String,
}

impl ScanArgs {
    pub fn run(self, agent_bin: Option<PathBuf>) -> Result<()> {
        let home = home()?;
        let config = load_config_at(&home).context("failed to load config")?;

        if self.dry_run {
            let repos = discover(&config)?;
            for repo in &repos {
                println!("{repo}");
            }
            println!("{} repositories found under {}", repos.len(), config.git_work_dir.display());
            return Ok(());
        }

        let (outcome, status) = supervisor(&home, &config, agent_bin)?
            .ensure_ready()
            .context("agent did not become ready")?;
        print_started(outcome, &status);
        register_all(&home, &config, &status.tunnel_domain)
    }
}

pub(crate) fn discover(config: &AgentConfig) -> Result<Vec<Repository>> {
    scan_repositories(&config.git_work_dir, DEFAULT_HOST, &GitCli::default()).with_context(|| {
        format!(
            "failed to scan work dir '{}'",
            config.git_work_dir.display()
        )
    })
}

/// Register a webhook on every discovered repository and record the ones that
/// succeeded in `repositories.json`.
pub(crate) fn register_all(home: &Path, config: &AgentConfig, hook_domain: &str) -> Result<()> {
    let repos = discover(config)?;
    if repos.is_empty() {
        println!(
            "No GitHub repositories found under {}",
            config.git_work_dir.display()
        );
        return Ok(());
    }

    let registrar = HookRegistrar::new(config.git_server_token.clone());
    register_repositories(home, config, &registrar, repos, hook_domain)
}

/// Fails without touching `repositories.json` when no registration succeeds.
fn register_repositories(
    home: &Path,
    config: &AgentConfig,
    registrar: &HookRegistrar,
    repos: Vec<Repository>,
    hook_domain: &str,
) -> Result<()> {
    let total = repos.len();
    let mut registered = Vec::new();
    let mut rows = Vec::new();
    for repo in repos {
        let webhook = match registrar.register(&repo, hook_domain, &config.git_hook_secret) {
            Ok(outcome) => {
                registered.push(repo.clone());
                match outcome {
                    HookOutcome::Created => "created".green().to_string(),
                    HookOutcome::AlreadyExists => "exists".green().to_string(),
                }
            }
            Err(err) => {
                eprintln!("{} {repo}: {err}", "✗".red().bold());
                "failed".red().to_string()
            }
        };
        rows.push(RepoRow {
            repository: repo.to_string(),
            settings: repo.hooks_page(DEFAULT_HOST),
            webhook,
        });
    }

    anyhow::ensure!(
        !registered.is_empty(),
        "creating webhooks failed for all {total} repositories; tracked repositories left unchanged"
    );

    let existing =
        store::load_repositories_at(home).context("failed to load tracked repositories")?;
    let tracked = merge_tracked(&existing, &registered, Utc::now());
    store::save_repositories_at(home, &tracked).context("failed to save tracked repositories")?;

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{} of {total} repositories tracked; pushes are pulled into {}",
        tracked.len(),
        config.git_work_dir.display()
    );
    Ok(())
}
