//! gitfresh agent: tunnel endpoint, status server, webhook dispatch, and the
//! CLI-side supervisor that keeps one agent per user profile running.

mod error;
pub mod log_rotation;
pub mod orchestrator;
pub mod probe;
pub mod signature;
pub mod status_server;
pub mod supervisor;
pub mod tunnel;
pub mod webhook;

use std::path::Path;
use std::sync::Arc;

use gitfresh_core::{config, AgentConfig, GitCli};

pub use error::AgentError;
pub use orchestrator::{AgentState, Orchestrator, STARTUP_DEADLINE};
pub use probe::{ProbeError, ProcessProbe, SystemProbe};
pub use status_server::API_VERSION;
pub use supervisor::{AgentCommand, AgentSupervisor, PollPolicy, StartOutcome};
pub use tunnel::{ConfiguredTunnel, DirectTunnel, NgrokTunnel, TunnelHandle, TunnelProvider};
pub use webhook::{DetachedPull, PullDispatch, WebhookDispatcher};

use crate::error::io_err;

/// Run the agent in the foreground for the profile at `home` and block until
/// it stops or degrades.
pub fn start_blocking(home: &Path) -> Result<(), AgentError> {
    init_tracing();
    let config = config::load_config_at(home)?;
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the agent with the production tunnel provider and `git` executable.
pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    let provider = ConfiguredTunnel::from_settings(&config.tunnel);
    let pulls: Arc<dyn PullDispatch> = Arc::new(DetachedPull::new(GitCli::default()));
    Orchestrator::new(config, provider, pulls)
        .run(shutdown_signal())
        .await
}

/// Resolves on Ctrl-C or, on unix, SIGTERM from `gitfresh agent stop`.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down agent"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down agent"),
    }
}

/// JSON lines on stdout; the supervisor redirects them to `agent.log`.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .with_current_span(false)
        .try_init();
}
