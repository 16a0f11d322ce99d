//! Listener lifecycle
//!
//! One accept loop per TCP listener. Every accepted connection gets socket
//! options applied, is registered with the cancellation watcher, and is handed
//! to its own tracked task. The loop ends when the token is cancelled, and the
//! listener is dropped with it.

use super::watcher::{watch, Watched};
use crate::helper::{SocketOpts, ACCEPT_ERROR_BACKOFF};
use anyhow::Result;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Per-connection behaviour of one proxy mode
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serve one accepted connection. The connection is closed when this returns.
    async fn handle(&self, conn: Watched<TcpStream>, peer: SocketAddr) -> Result<()>;
}

/// Source of accepted connections for [`serve`]
#[async_trait]
pub trait Acceptor: Send + 'static {
    /// Wait for the next connection
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;

    /// Address the acceptor is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Run the accept loop until `token` is cancelled.
///
/// Accept errors are logged and retried after a short pause. Handler tasks are
/// spawned on `tracker` so shutdown can wait for them.
pub async fn serve<A: Acceptor>(
    mut listener: A,
    token: CancellationToken,
    tracker: TaskTracker,
    handler: Arc<dyn ConnectionHandler>,
) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    let opts = SocketOpts::default();

    loop {
        if token.is_cancelled() {
            break;
        }

        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            r = listener.accept() => r,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept on {}: {}", local, e);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        if let Err(e) = opts.apply(&stream) {
            debug!("Failed to set socket options for {}: {}", peer, e);
        }

        let conn = watch(stream, &token);
        let handler = handler.clone();
        tracker.spawn(async move {
            if let Err(e) = handler.handle(conn, peer).await {
                if is_benign_error(&e) {
                    debug!("Connection from {} closed: {:#}", peer, e);
                } else {
                    warn!("Connection from {} failed: {:#}", peer, e);
                }
            }
        });
    }

    info!("Listener on {} stopped", local);
}

/// Whether a handler error only reflects shutdown or forced expiry
pub fn is_benign_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(crate::error::is_benign)
}
