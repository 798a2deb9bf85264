//! Agent startup coordination.
//!
//! Two tasks run side by side: the tunnel (open, then serve webhooks) and the
//! status server (wait for the tunnel URL, bind, then serve). Each reports the
//! end of its startup phase on a channel; the orchestrator gives both
//! together [`STARTUP_DEADLINE`] to do so and afterwards waits for the first
//! of: a serve loop exiting, or the shutdown signal.
//!
//! ```text
//! Idle → Starting → Ready → Degraded(err)
//!                 ↘       ↘ Stopped
//!                   Degraded(err)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use gitfresh_core::AgentConfig;

use crate::error::AgentError;
use crate::signature::WebhookSecret;
use crate::status_server::{self, StatusServer};
use crate::tunnel::{self, TunnelProvider};
use crate::webhook::{PullDispatch, WebhookDispatcher};

/// Time both listeners get to come up.
pub const STARTUP_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Starting,
    Ready,
    /// Fatal error, startup or runtime. Terminal.
    Degraded(String),
    /// Shutdown was requested. Terminal.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Tunnel,
    Status,
}

impl Component {
    fn name(self) -> &'static str {
        match self {
            Component::Tunnel => tunnel::COMPONENT,
            Component::Status => status_server::COMPONENT,
        }
    }
}

pub struct Orchestrator<P> {
    config: AgentConfig,
    provider: P,
    pulls: Arc<dyn PullDispatch>,
    startup_deadline: Duration,
    state: watch::Sender<AgentState>,
}

impl<P: TunnelProvider> Orchestrator<P> {
    pub fn new(config: AgentConfig, provider: P, pulls: Arc<dyn PullDispatch>) -> Self {
        let (state, _) = watch::channel(AgentState::Idle);
        Self {
            config,
            provider,
            pulls,
            startup_deadline: STARTUP_DEADLINE,
            state,
        }
    }

    pub fn with_startup_deadline(mut self, deadline: Duration) -> Self {
        self.startup_deadline = deadline;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Run the agent until it degrades or `shutdown` resolves.
    ///
    /// Returns `Ok(())` only for a requested shutdown after a successful start.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), AgentError> {
        let Self {
            config,
            provider,
            pulls,
            startup_deadline,
            state,
        } = self;
        state.send_replace(AgentState::Starting);
        tracing::info!(
            provider = %config.tunnel.provider,
            status_addr = %config.status_addr,
            "agent starting",
        );

        let (url_tx, url_rx) = oneshot::channel::<String>();
        let (started_tx, mut started_rx) = mpsc::channel::<Component>(2);
        let (error_tx, mut error_rx) = mpsc::channel::<AgentError>(2);

        let app = WebhookDispatcher::new(config.git_work_dir.clone(), pulls)
            .signed_router(WebhookSecret::new(config.git_hook_secret.clone()));
        let status_addr = config.status_addr;

        let tunnel_task = {
            let started = started_tx.clone();
            let errors = error_tx.clone();
            tokio::spawn(async move {
                let handle = match provider.open(&config).await {
                    Ok(handle) => handle,
                    Err(err) => {
                        let _ = errors.send(err).await;
                        return;
                    }
                };
                tracing::info!(url = %handle.url(), "tunnel opened");
                if url_tx.send(handle.url().to_string()).is_err() {
                    return;
                }
                let _ = started.send(Component::Tunnel).await;
                let result = tunnel::serve(handle, app).await;
                let _ = errors.send(exit_error(Component::Tunnel, result)).await;
            })
        };

        let status_task = tokio::spawn(async move {
            let server = match StatusServer::bind(status_addr, url_rx).await {
                Ok(server) => server,
                Err(err) => {
                    let _ = error_tx.send(err).await;
                    return;
                }
            };
            let _ = started_tx.send(Component::Status).await;
            let result = server.serve().await;
            let _ = error_tx.send(exit_error(Component::Status, result)).await;
        });
        let tasks = [tunnel_task, status_task];

        let startup = async {
            let mut pending = 2;
            loop {
                tokio::select! {
                    Some(component) = started_rx.recv() => {
                        tracing::info!(component = component.name(), "component started");
                        pending -= 1;
                        if pending == 0 {
                            return Ok(());
                        }
                    }
                    Some(err) = error_rx.recv() => return Err(err),
                    else => return Err(AgentError::ChannelClosed("startup signals")),
                }
            }
        };
        let started = match tokio::time::timeout(startup_deadline, startup).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::StartupTimeout(startup_deadline)),
        };
        if let Err(err) = started {
            return Err(degrade(&state, &tasks, err));
        }

        state.send_replace(AgentState::Ready);
        tracing::info!("agent ready");

        let outcome = tokio::select! {
            err = next_failure(&mut error_rx) => Err(err),
            _ = shutdown => Ok(()),
        };
        match outcome {
            Ok(()) => {
                abort_all(&tasks);
                state.send_replace(AgentState::Stopped);
                tracing::info!("agent stopped");
                Ok(())
            }
            Err(err) => Err(degrade(&state, &tasks, err)),
        }
    }
}

/// First error reported after Ready. Both tasks ending without a report
/// (e.g. a panic) closes the channel and counts as a failure too.
async fn next_failure(errors: &mut mpsc::Receiver<AgentError>) -> AgentError {
    errors
        .recv()
        .await
        .unwrap_or(AgentError::ChannelClosed("component errors"))
}

/// A serve loop only returns when something went wrong, even with `Ok`.
fn exit_error(component: Component, result: Result<(), AgentError>) -> AgentError {
    match result {
        Ok(()) => AgentError::ServeExited {
            component: component.name(),
            reason: "listener closed".to_string(),
        },
        Err(err) => err,
    }
}

fn degrade(
    state: &watch::Sender<AgentState>,
    tasks: &[JoinHandle<()>],
    err: AgentError,
) -> AgentError {
    abort_all(tasks);
    tracing::error!(error = %err, "agent degraded");
    state.send_replace(AgentState::Degraded(err.to_string()));
    err
}

fn abort_all(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use gitfresh_core::{PullJob, TunnelSettings};
    use tokio::net::TcpListener;

    use super::*;
    use crate::tunnel::{DirectTunnel, TunnelHandle};

    struct NoPulls;

    impl PullDispatch for NoPulls {
        fn dispatch(&self, _job: PullJob) {}
    }

    enum FakeTunnel {
        Rejected,
        Hangs,
        #[cfg(unix)]
        ProviderDiesAfterStart,
    }

    impl TunnelProvider for FakeTunnel {
        async fn open(&self, _config: &AgentConfig) -> Result<TunnelHandle, AgentError> {
            match self {
                FakeTunnel::Rejected => Err(AgentError::Tunnel("authentication failed".into())),
                FakeTunnel::Hangs => std::future::pending().await,
                #[cfg(unix)]
                FakeTunnel::ProviderDiesAfterStart => {
                    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let child = tokio::process::Command::new("sleep")
                        .arg("0.3")
                        .kill_on_drop(true)
                        .spawn()
                        .unwrap();
                    Ok(TunnelHandle::new("https://dies.test", listener).with_process(child))
                }
            }
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            tunnel_token: "tok".into(),
            tunnel_domain: "hooks.example.test".into(),
            git_server_token: "ghp".into(),
            git_work_dir: PathBuf::from("/code"),
            git_hook_secret: "s3cret".into(),
            status_addr: "127.0.0.1:0".parse().unwrap(),
            tunnel: TunnelSettings {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                ..TunnelSettings::default()
            },
        }
    }

    fn orchestrator<P: TunnelProvider>(provider: P) -> Orchestrator<P> {
        Orchestrator::new(config(), provider, Arc::new(NoPulls))
    }

    #[tokio::test]
    async fn reaches_ready_then_stops_on_shutdown() {
        let agent = orchestrator(DirectTunnel);
        let mut state = agent.subscribe();
        assert_eq!(*state.borrow(), AgentState::Idle);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(agent.run(async {
            let _ = stop_rx.await;
        }));

        state
            .wait_for(|s| *s == AgentState::Ready)
            .await
            .expect("state channel open");
        stop_tx.send(()).unwrap();

        running.await.unwrap().expect("clean shutdown");
        assert_eq!(*state.borrow(), AgentState::Stopped);
    }

    #[tokio::test]
    async fn tunnel_failure_degrades_during_startup() {
        let agent = orchestrator(FakeTunnel::Rejected);
        let state = agent.subscribe();

        let err = agent.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, AgentError::Tunnel(_)), "got: {err}");
        assert!(matches!(&*state.borrow(), AgentState::Degraded(msg) if msg.contains("authentication")));
    }

    #[tokio::test(start_paused = true)]
    async fn startup_deadline_is_enforced() {
        let agent = orchestrator(FakeTunnel::Hangs);
        let state = agent.subscribe();

        let err = agent.run(std::future::pending()).await.unwrap_err();
        assert!(
            matches!(err, AgentError::StartupTimeout(d) if d == STARTUP_DEADLINE),
            "got: {err}"
        );
        assert!(matches!(*state.borrow(), AgentState::Degraded(_)));
    }

    #[tokio::test]
    async fn status_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = config();
        cfg.status_addr = taken.local_addr().unwrap();
        let agent = Orchestrator::new(cfg, DirectTunnel, Arc::new(NoPulls));

        let err = agent.run(std::future::pending()).await.unwrap_err();
        assert!(
            matches!(err, AgentError::Bind { component: "status server", .. }),
            "got: {err}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn serve_exit_after_ready_degrades() {
        let agent = orchestrator(FakeTunnel::ProviderDiesAfterStart);
        let mut state = agent.subscribe();
        let running = tokio::spawn(agent.run(std::future::pending()));

        state
            .wait_for(|s| *s == AgentState::Ready)
            .await
            .expect("state channel open");
        let err = running.await.unwrap().unwrap_err();
        assert!(
            matches!(err, AgentError::ServeExited { component: "tunnel", .. }),
            "got: {err}"
        );
        assert!(matches!(*state.borrow(), AgentState::Degraded(_)));
    }

    #[test]
    fn clean_listener_exit_still_counts_as_failure() {
        let err = exit_error(Component::Status, Ok(()));
        assert!(err.to_string().contains("status server stopped serving"));
    }

    #[tokio::test]
    async fn silent_task_exit_is_a_failure() {
        let (tx, mut rx) = mpsc::channel::<AgentError>(2);
        let second = tx.clone();
        drop(tx);
        drop(second);

        let err = next_failure(&mut rx).await;
        assert!(matches!(err, AgentError::ChannelClosed("component errors")), "got: {err}");
    }
}
