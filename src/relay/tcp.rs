//! TCP connection handlers
//!
//! [`TcpLocal`] serves every client-side TCP mode (SOCKS, tunnel, redirect):
//! the mode only differs in its [`Resolver`]. [`TcpRemote`] is the server side.

use super::engine::{relay, RelayResult};
use super::listener::ConnectionHandler;
use super::resolver::{Resolved, Resolver};
use super::watcher::{watch, Watched};
use crate::cipher::Cipher;
use crate::error::is_timeout;
use crate::helper::dial;
use crate::socks::Addr;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Client side: resolve, dial the server, send the destination, relay
pub struct TcpLocal {
    resolver: Box<dyn Resolver>,
    server: String,
    cipher: Cipher,
    token: CancellationToken,
}

impl TcpLocal {
    /// Create a handler relaying through `server`
    pub fn new(
        resolver: Box<dyn Resolver>,
        server: String,
        cipher: Cipher,
        token: CancellationToken,
    ) -> Self {
        TcpLocal {
            resolver,
            server,
            cipher,
            token,
        }
    }
}

#[async_trait]
impl ConnectionHandler for TcpLocal {
    async fn handle(&self, mut conn: Watched<TcpStream>, peer: SocketAddr) -> Result<()> {
        let target = match self
            .resolver
            .resolve(&mut conn)
            .await
            .context("Failed to get target address")?
        {
            Resolved::Target(target) => target,
            Resolved::UdpAssociate => {
                hold_udp_associate(&mut conn).await;
                debug!("UDP associate from {} ended", peer);
                return Ok(());
            }
        };

        let rc = dial(&self.server, &self.token)
            .await
            .with_context(|| format!("Failed to connect to server {}", self.server))?;
        let mut rc = self.cipher.stream_conn(watch(rc, &self.token));

        rc.write_all(&target.to_bytes())
            .await
            .context("Failed to send target address")?;
        rc.flush().await.context("Failed to send target address")?;

        debug!("proxy {} <-> {} <-> {}", peer, self.server, target);
        let result = relay(&mut conn, &mut rc).await;
        log_relay(&peer.to_string(), &target, &result);
        if conn.is_closed() {
            debug!("Connection from {} closed on shutdown", peer);
        }
        Ok(())
    }
}

/// Server side: decrypt, read the destination, dial it, relay
pub struct TcpRemote {
    cipher: Cipher,
    token: CancellationToken,
}

impl TcpRemote {
    /// Create a server-side handler
    pub fn new(cipher: Cipher, token: CancellationToken) -> Self {
        TcpRemote { cipher, token }
    }
}

#[async_trait]
impl ConnectionHandler for TcpRemote {
    async fn handle(&self, conn: Watched<TcpStream>, peer: SocketAddr) -> Result<()> {
        let mut conn = self.cipher.stream_conn(conn);

        let target = Addr::read_from(&mut conn)
            .await
            .context("Failed to get target address")?;

        let rc = dial(&target.to_string(), &self.token)
            .await
            .with_context(|| format!("Failed to connect to target {}", target))?;
        let mut rc = watch(rc, &self.token);

        debug!("proxy {} <-> {}", peer, target);
        let result = relay(&mut conn, &mut rc).await;
        log_relay(&peer.to_string(), &target, &result);
        Ok(())
    }
}

/// Keep a UDP ASSOCIATE control connection open until the client leaves.
///
/// Incoming bytes are discarded; timeout-class errors do not end the hold.
pub async fn hold_udp_associate<S>(conn: &mut S)
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                debug!("UDP associate control connection closed: {}", e);
                return;
            }
        }
    }
}

/// Byte counts from the accepted client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Traffic {
    sent: u64,
    received: u64,
}

impl Traffic {
    /// Both handlers relay with the accepted connection on the left.
    fn of(result: &RelayResult) -> Self {
        Traffic {
            sent: result.left_to_right,
            received: result.right_to_left,
        }
    }
}

fn log_relay(peer: &str, target: &Addr, result: &RelayResult) {
    let traffic = Traffic::of(result);
    debug!(
        "{} <-> {} done: {} bytes sent, {} bytes received",
        peer, target, traffic.sent, traffic.received
    );
    if let Some(e) = result.failure() {
        warn!("Relay error between {} and {}: {}", peer, target, e);
    }
}
