//! Externally reachable webhook endpoint.
//!
//! A [`TunnelProvider`] binds a local listener and returns a [`TunnelHandle`]
//! carrying the public URL that forwards to it. [`serve`] then runs the
//! webhook router on that listener until the listener or the provider dies.

use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;

use axum::Router;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, ChildStdout, Command};

use gitfresh_core::{AgentConfig, TunnelProviderKind, TunnelSettings};

use crate::error::AgentError;

pub(crate) const COMPONENT: &str = "tunnel";

/// Public URL plus the listener it forwards to. Dropping the handle closes
/// the listener and kills the provider process, if any.
#[derive(Debug)]
pub struct TunnelHandle {
    url: String,
    listener: TcpListener,
    process: Option<Child>,
}

impl TunnelHandle {
    pub fn new(url: impl Into<String>, listener: TcpListener) -> Self {
        Self {
            url: url.into(),
            listener,
            process: None,
        }
    }

    /// Tie the handle to an out-of-process provider; its exit ends [`serve`].
    pub fn with_process(mut self, child: Child) -> Self {
        self.process = Some(child);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Opens the tunnel. Any error is fatal to the agent.
pub trait TunnelProvider: Send + Sync + 'static {
    fn open(
        &self,
        config: &AgentConfig,
    ) -> impl Future<Output = Result<TunnelHandle, AgentError>> + Send;
}

/// Serve `app` on the tunnel listener.
///
/// Returns `Ok(())` if the listener closes on its own and an error if serving
/// fails or the provider process exits.
pub async fn serve(handle: TunnelHandle, app: Router) -> Result<(), AgentError> {
    let TunnelHandle {
        url,
        listener,
        process,
    } = handle;
    tracing::info!(url = %url, "serving webhooks");

    let server = axum::serve(listener, app).into_future();
    let Some(mut child) = process else {
        return server.await.map_err(serve_failed);
    };

    tokio::select! {
        result = server => result.map_err(serve_failed),
        status = child.wait() => Err(AgentError::ServeExited {
            component: COMPONENT,
            reason: match status {
                Ok(status) => format!("tunnel provider exited ({status})"),
                Err(err) => format!("lost track of tunnel provider: {err}"),
            },
        }),
    }
}

fn serve_failed(err: io::Error) -> AgentError {
    AgentError::ServeExited {
        component: COMPONENT,
        reason: err.to_string(),
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, AgentError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| AgentError::Bind {
            component: COMPONENT,
            addr,
            source,
        })
}

// ---------------------------------------------------------------------------
// Direct
// ---------------------------------------------------------------------------

/// Listens on `tunnel.listen_addr` and advertises `tunnel_domain` as is.
/// For hosts that are already reachable, e.g. behind a reverse proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectTunnel;

impl TunnelProvider for DirectTunnel {
    async fn open(&self, config: &AgentConfig) -> Result<TunnelHandle, AgentError> {
        let listener = bind(config.tunnel.listen_addr).await?;
        let local = listener.local_addr().map_err(|source| AgentError::Bind {
            component: COMPONENT,
            addr: config.tunnel.listen_addr,
            source,
        })?;
        let url = config
            .tunnel_url()
            .unwrap_or_else(|| format!("http://{local}"));
        Ok(TunnelHandle::new(url, listener))
    }
}

// ---------------------------------------------------------------------------
// ngrok
// ---------------------------------------------------------------------------

/// Runs the `ngrok` agent as a child process forwarding to a local listener.
#[derive(Debug, Clone)]
pub struct NgrokTunnel {
    program: PathBuf,
}

impl NgrokTunnel {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, local: SocketAddr, config: &AgentConfig) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("http")
            .arg(local.to_string())
            .arg("--authtoken")
            .arg(&config.tunnel_token);
        if let Some(domain) = bare_domain(&config.tunnel_domain) {
            command.arg("--domain").arg(domain);
        }
        if !config.git_hook_secret.is_empty() {
            command
                .args(["--verify-webhook", "github", "--verify-webhook-secret"])
                .arg(&config.git_hook_secret);
        }
        command
            .args(["--log", "stdout", "--log-format", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl Default for NgrokTunnel {
    fn default() -> Self {
        Self::new("ngrok")
    }
}

impl TunnelProvider for NgrokTunnel {
    async fn open(&self, config: &AgentConfig) -> Result<TunnelHandle, AgentError> {
        let listener = bind(config.tunnel.listen_addr).await?;
        let local = listener.local_addr().map_err(|source| AgentError::Bind {
            component: COMPONENT,
            addr: config.tunnel.listen_addr,
            source,
        })?;

        let mut child = self.command(local, config).spawn().map_err(|err| {
            AgentError::Tunnel(format!("failed to launch {}: {err}", self.program.display()))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Tunnel("ngrok stdout not captured".to_string()))?;

        let (url, rest) = wait_for_url(stdout).await?;
        tracing::debug!(%local, url = %url, pid = child.id(), "ngrok tunnel started");
        tokio::spawn(forward_log(rest));
        Ok(TunnelHandle::new(url, listener).with_process(child))
    }
}

/// Any configured provider, selected from [`TunnelSettings`].
#[derive(Debug, Clone)]
pub enum ConfiguredTunnel {
    Ngrok(NgrokTunnel),
    Direct(DirectTunnel),
}

impl ConfiguredTunnel {
    pub fn from_settings(settings: &TunnelSettings) -> Self {
        match settings.provider {
            TunnelProviderKind::Ngrok => Self::Ngrok(NgrokTunnel::new(&settings.ngrok_bin)),
            TunnelProviderKind::Direct => Self::Direct(DirectTunnel),
        }
    }
}

impl TunnelProvider for ConfiguredTunnel {
    async fn open(&self, config: &AgentConfig) -> Result<TunnelHandle, AgentError> {
        match self {
            Self::Ngrok(ngrok) => ngrok.open(config).await,
            Self::Direct(direct) => direct.open(config).await,
        }
    }
}

type LogLines = tokio::io::Lines<BufReader<ChildStdout>>;

/// One line of `ngrok --log-format json` output.
#[derive(Debug, Deserialize)]
struct NgrokLogLine {
    #[serde(default)]
    lvl: String,
    #[serde(default)]
    msg: String,
    url: Option<String>,
    err: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum LogEvent {
    Started(String),
    Failed(String),
    Other,
}

fn classify(line: &str) -> LogEvent {
    let Ok(entry) = serde_json::from_str::<NgrokLogLine>(line) else {
        return LogEvent::Other;
    };
    match entry {
        NgrokLogLine {
            msg, url: Some(url), ..
        } if msg == "started tunnel" => LogEvent::Started(url),
        NgrokLogLine {
            lvl, msg, err: Some(err), ..
        } if lvl == "eror" || lvl == "crit" => LogEvent::Failed(format!("{msg}: {err}")),
        _ => LogEvent::Other,
    }
}

async fn wait_for_url(stdout: ChildStdout) -> Result<(String, LogLines), AgentError> {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|err| AgentError::Tunnel(format!("reading ngrok output: {err}")))?
            .ok_or_else(|| {
                AgentError::Tunnel("ngrok exited before the tunnel started".to_string())
            })?;
        match classify(&line) {
            LogEvent::Started(url) => return Ok((url, lines)),
            LogEvent::Failed(reason) => return Err(AgentError::Tunnel(reason)),
            LogEvent::Other => tracing::trace!(line = %line, "ngrok"),
        }
    }
}

async fn forward_log(mut lines: LogLines) {
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(line = %line, "ngrok");
    }
}

/// `--domain` takes a host name, while `tunnel_domain` may be a full URL.
fn bare_domain(domain: &str) -> Option<&str> {
    let domain = domain.trim();
    let host = domain
        .strip_prefix("https://")
        .or_else(|| domain.strip_prefix("http://"))
        .unwrap_or(domain)
        .trim_end_matches('/');
    (!host.is_empty()).then_some(host)
}
