//! Loopback status endpoint polled by the CLI.

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use gitfresh_core::AgentStatus;

use crate::error::AgentError;

pub(crate) const COMPONENT: &str = "status server";

/// Version reported on the status endpoint.
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub struct StatusServer {
    listener: TcpListener,
    status: Arc<AgentStatus>,
}

impl StatusServer {
    /// Wait for the tunnel URL, then bind `addr`.
    ///
    /// The listener never exists before the tunnel has opened. A dropped
    /// sender means the tunnel failed and is reported as `ChannelClosed`.
    pub async fn bind(
        addr: SocketAddr,
        tunnel_url: oneshot::Receiver<String>,
    ) -> Result<Self, AgentError> {
        let url = tunnel_url
            .await
            .map_err(|_| AgentError::ChannelClosed("tunnel url handshake"))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AgentError::Bind {
                component: COMPONENT,
                addr,
                source,
            })?;
        tracing::info!(%addr, tunnel_domain = %url, "status server listening");

        Ok(Self {
            listener,
            status: Arc::new(AgentStatus {
                api_version: API_VERSION.to_string(),
                tunnel_domain: url,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn status(&self) -> &AgentStatus {
        &self.status
    }

    /// Serve until the listener fails. `Ok(())` means it closed on its own.
    pub async fn serve(self) -> Result<(), AgentError> {
        axum::serve(self.listener, router(self.status))
            .into_future()
            .await
            .map_err(|err| AgentError::ServeExited {
                component: COMPONENT,
                reason: err.to_string(),
            })
    }
}

/// Every method on every path reports the same status document.
pub fn router(status: Arc<AgentStatus>) -> Router {
    Router::new().fallback(report_status).with_state(status)
}

async fn report_status(State(status): State<Arc<AgentStatus>>) -> Json<AgentStatus> {
    Json(AgentStatus::clone(&status))
}
