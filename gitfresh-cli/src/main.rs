//! gitfresh: keep local clones in sync with GitHub through push webhooks.
//!
//! # Usage
//!
//! ```text
//! gitfresh version
//! gitfresh config --tunnel-token <T> --git-server-token <T> --git-work-dir <DIR> [...]
//! gitfresh init
//! gitfresh scan [--dry-run]
//! gitfresh agent start|stop|status|run|logs
//! ```

mod commands;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{agent::AgentArgs, config::ConfigArgs, init::InitArgs, scan::ScanArgs};
use gitfresh_core::TunnelProviderKind;

#[derive(Parser, Debug)]
#[command(
    name = "gitfresh",
    version,
    about = "Keep local git clones in sync with their GitHub origin",
    long_about = None,
)]
struct Cli {
    /// Executable started as the agent (`<bin> agent run`). Defaults to this binary.
    #[arg(long, global = true, env = "GITFRESH_AGENT_BIN", value_name = "PATH")]
    agent_bin: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the gitfresh version.
    Version,

    /// Create or update ~/.gitfresh/config.json.
    Config(ConfigArgs),

    /// Start the agent and register webhooks for every repository in the work dir.
    Init(InitArgs),

    /// Re-scan the work dir and register webhooks on repositories found there.
    Scan(ScanArgs),

    /// Manage the background agent.
    Agent(AgentArgs),
}

/// Lets clap parse [`TunnelProviderKind`] without core depending on clap.
#[derive(Debug, Clone, Copy)]
pub struct ProviderArg(pub TunnelProviderKind);

impl FromStr for ProviderArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ngrok" => Ok(Self(TunnelProviderKind::Ngrok)),
            "direct" => Ok(Self(TunnelProviderKind::Direct)),
            other => Err(format!(
                "unknown tunnel provider '{other}'; expected: ngrok, direct"
            )),
        }
    }
}

impl fmt::Display for ProviderArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("gitfresh {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Config(args) => args.run(),
        Commands::Init(args) => args.run(cli.agent_bin),
        Commands::Scan(args) => args.run(cli.agent_bin),
        Commands::Agent(args) => args.run(cli.agent_bin),
    }
}
