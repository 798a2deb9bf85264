//! `gitfresh agent`: lifecycle of the background agent process.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;

use gitfresh_agent::{
    start_blocking, AgentCommand, AgentError, AgentSupervisor, PollPolicy, StartOutcome,
};
use gitfresh_core::config::load_config_at;
use gitfresh_core::paths::{pid_path, stderr_log_path, stdout_log_path};
use gitfresh_core::{AgentConfig, AgentStatus, ConfigError};

use super::home;

#[derive(Args, Debug)]
pub struct AgentArgs {
    #[command(subcommand)]
    pub command: AgentCommandArg,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommandArg {
    /// Launch the agent in the background unless it is already running.
    Start,
    /// Ask the running agent to shut down.
    Stop,
    /// Report whether the agent is running and its tunnel URL.
    Status,
    /// Run the agent in the foreground (used by `start`).
    Run,
    /// Print recent agent log lines.
    Logs(LogsArgs),
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the stderr log file.
    #[arg(long)]
    pub stderr_only: bool,
}

#[derive(Serialize)]
struct StatusReport {
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tunnel_domain: Option<String>,
    status_url: String,
    pid_file: String,
}

impl AgentArgs {
    pub fn run(self, agent_bin: Option<PathBuf>) -> Result<()> {
        let home = home()?;

        match self.command {
            AgentCommandArg::Start => {
                let config = load_config_at(&home).context("failed to load config")?;
                let supervisor = supervisor(&home, &config, agent_bin)?;
                let (outcome, status) = supervisor
                    .ensure_ready()
                    .context("agent did not become ready")?;
                print_started(outcome, &status);
            }
            AgentCommandArg::Stop => {
                let config = config_or_default(&home)?;
                let supervisor = supervisor(&home, &config, agent_bin)?;
                match supervisor.stop().context("failed to stop agent")? {
                    Some(pid) => println!("{} agent stopped (pid {pid})", "✓".green().bold()),
                    None => println!("agent is not running"),
                }
            }
            AgentCommandArg::Status => {
                let config = config_or_default(&home)?;
                let supervisor = supervisor(&home, &config, agent_bin)?;
                let report = status_report(&home, &supervisor)?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .context("failed to render agent status JSON")?
                );
            }
            AgentCommandArg::Run => {
                start_blocking(&home).context("agent exited with error")?;
            }
            AgentCommandArg::Logs(args) => {
                if args.stderr_only {
                    print_tail(&stderr_log_path(&home), args.lines)
                        .context("failed to read agent stderr log")?;
                } else {
                    print_tail(&stdout_log_path(&home), args.lines)
                        .context("failed to read agent stdout log")?;
                    print_tail(&stderr_log_path(&home), args.lines)
                        .context("failed to read agent stderr log")?;
                }
            }
        }

        Ok(())
    }
}

/// Supervisor for the agent of `home`, launching `agent_bin` or this executable.
pub(crate) fn supervisor(
    home: &Path,
    config: &AgentConfig,
    agent_bin: Option<PathBuf>,
) -> Result<AgentSupervisor> {
    let command = match agent_bin {
        Some(bin) => AgentCommand::gitfresh(bin),
        None => AgentCommand::current_exe().context("cannot locate the gitfresh executable")?,
    };
    Ok(AgentSupervisor::for_home(home, config, command))
}

pub(crate) fn print_started(outcome: StartOutcome, status: &AgentStatus) {
    let state = match outcome {
        StartOutcome::AlreadyRunning(_) => "already running",
        StartOutcome::Launched(_) => "started",
    };
    println!(
        "{} agent {state} (pid {}, v{})",
        "✓".green().bold(),
        outcome.pid(),
        status.api_version
    );
    println!("  Tunnel: {}", status.tunnel_domain.cyan());
}

/// Stop and status work without a config; they only need the default address.
fn config_or_default(home: &Path) -> Result<AgentConfig> {
    match load_config_at(home) {
        Ok(config) => Ok(config),
        Err(ConfigError::ConfigNotFound { .. }) => Ok(AgentConfig::default()),
        Err(err) => Err(err).context("failed to load config"),
    }
}

fn status_report(home: &Path, supervisor: &AgentSupervisor) -> Result<StatusReport> {
    let mut report = StatusReport {
        running: false,
        pid: None,
        api_version: None,
        tunnel_domain: None,
        status_url: supervisor.status_url().to_string(),
        pid_file: pid_path(home).display().to_string(),
    };

    let Some(pid) = supervisor
        .is_running()
        .context("failed to read agent PID file")?
    else {
        return Ok(report);
    };
    report.pid = Some(pid);

    let policy = PollPolicy::IMMEDIATE;
    match supervisor.wait_until_ready(policy.max_attempts, policy.interval) {
        Ok(status) => {
            report.running = true;
            report.api_version = Some(status.api_version);
            report.tunnel_domain = Some(status.tunnel_domain);
            Ok(report)
        }
        Err(err @ AgentError::NotReachable { .. }) => {
            Err(err).with_context(|| format!("agent process {pid} is alive but not answering"))
        }
        Err(err) => Err(err).context("failed to query agent status"),
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
