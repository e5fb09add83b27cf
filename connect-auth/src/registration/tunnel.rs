//! Exposing the local port to remote hosts during development.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::{io::copy_bidirectional, net::TcpStream, task::JoinSet};
use tracing::instrument;
use url::Url;

use crate::error::{AuthError, Result};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_CONNECTIONS: u32 = 10;

/// Something that can make the add-on's local port reachable from outside.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Opens a tunnel to `local_port` and returns its public URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Tunnel`] if no tunnel could be established.
    async fn open(&self, local_port: u16) -> Result<Url>;
}

/// Assignment returned by a localtunnel server.
#[derive(Debug, Clone, Deserialize)]
struct Assignment {
    id: String,
    port: u16,
    #[serde(default = "default_max_conn_count")]
    max_conn_count: u32,
    url: String,
}

const fn default_max_conn_count() -> u32 {
    1
}

/// Client for the localtunnel protocol.
///
/// The server hands out a public URL and a TCP port; the client keeps a pool
/// of connections to that port and splices each one to the local port. The
/// pool lives as long as the `LocalTunnel`.
#[derive(Debug)]
pub struct LocalTunnel {
    client: Client,
    server: String,
    local_host: String,
    connections: Mutex<JoinSet<()>>,
}

impl LocalTunnel {
    /// Creates a provider using the tunnel server at `server`.
    #[must_use]
    pub fn new(client: Client, server: impl Into<String>) -> Self {
        Self {
            client,
            server: server.into(),
            local_host: "127.0.0.1".to_owned(),
            connections: Mutex::new(JoinSet::new()),
        }
    }

    /// Closes every tunnel connection.
    pub fn close(&self) {
        self.connections.lock().abort_all();
    }

    async fn request_assignment(&self) -> Result<Assignment> {
        let url = format!("{}/?new", self.server.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Tunnel(format!("tunnel server unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Tunnel(format!(
                "tunnel server answered {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::Tunnel(format!("unexpected tunnel assignment: {e}")))
    }
}

#[async_trait]
impl TunnelProvider for LocalTunnel {
    #[instrument(skip(self), fields(server = %self.server))]
    async fn open(&self, local_port: u16) -> Result<Url> {
        let assignment = self.request_assignment().await?;
        let public_url = Url::parse(&assignment.url)
            .map_err(|e| AuthError::Tunnel(format!("invalid tunnel URL {}: {e}", assignment.url)))?;
        let remote_host = Url::parse(&self.server)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .ok_or_else(|| AuthError::Tunnel(format!("invalid tunnel server {}", self.server)))?;

        let pool = assignment.max_conn_count.clamp(1, MAX_CONNECTIONS);
        tracing::debug!(
            id = %assignment.id,
            remote_port = assignment.port,
            pool,
            "tunnel assigned"
        );

        let mut connections = self.connections.lock();
        for _ in 0..pool {
            connections.spawn(splice_forever(
                (remote_host.clone(), assignment.port),
                (self.local_host.clone(), local_port),
            ));
        }
        Ok(public_url)
    }
}

/// Keeps one tunnel connection alive, reconnecting after each session ends.
async fn splice_forever(remote: (String, u16), local: (String, u16)) {
    loop {
        match splice_once(&remote, &local).await {
            Ok((up, down)) => tracing::trace!(up, down, "tunnel connection closed"),
            Err(e) => tracing::debug!(error = %e, "tunnel connection failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn splice_once(remote: &(String, u16), local: &(String, u16)) -> std::io::Result<(u64, u64)> {
    let mut upstream = TcpStream::connect((remote.0.as_str(), remote.1)).await?;
    let mut downstream = TcpStream::connect((local.0.as_str(), local.1)).await?;
    copy_bidirectional(&mut upstream, &mut downstream).await
}
