//! Mode orchestration
//!
//! [`Orchestrator::start`] turns a [`Config`] into running listeners, one per
//! [`ProxyMode`], all sharing one cancellation token and one task tracker.
//! [`Orchestrator::shutdown`] cancels the token and waits for every listener,
//! connection handler and UDP session to finish.

use crate::cipher::{pick_cipher, Cipher};
use crate::config::{Config, Endpoint, ModeKind, ProxyMode};
use crate::redir;
use crate::relay::{
    serve, ConnectionHandler, FixedTarget, RedirectDerived, Resolver, SocksHandshake, TcpLocal,
    TcpRemote, UdpFraming, UdpLocal, UdpRemote,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// A mode whose listener is running
#[derive(Debug, Clone)]
pub struct BoundMode {
    /// The configured mode
    pub mode: ProxyMode,
    /// Address actually bound
    pub local_addr: SocketAddr,
}

/// Owner of every task started for a configuration
pub struct Orchestrator {
    token: CancellationToken,
    tracker: TaskTracker,
    bound: Vec<BoundMode>,
}

/// Cipher and peer settings for one side
struct Side {
    endpoint: Endpoint,
    cipher: Cipher,
}

fn side(endpoint: Option<Endpoint>, key: &[u8]) -> Result<Option<Side>> {
    endpoint
        .map(|endpoint| {
            let cipher = pick_cipher(&endpoint.cipher, key, &endpoint.password)?;
            Ok(Side { endpoint, cipher })
        })
        .transpose()
}

/// Go-style `:port` means every interface
fn listen_addr(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}

impl Orchestrator {
    /// Validate `config`, bind every listener and start serving.
    ///
    /// Configuration errors abort before anything is bound. A listener that
    /// fails to bind is logged and skipped; the other modes still start.
    pub async fn start(config: &Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let key = config.key_bytes()?;
        let client = side(config.client_endpoint()?, &key).context("Client cipher")?;
        let server = side(config.server_endpoint()?, &key).context("Server cipher")?;
        let modes = config.modes()?;

        let mut orchestrator = Orchestrator {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            bound: Vec::new(),
        };

        // UDP twins bind the exact address their TCP listener got.
        let mut tcp_bound: HashMap<String, SocketAddr> = HashMap::new();

        for mode in modes {
            let peer = if mode.kind.is_server() {
                server.as_ref()
            } else {
                client.as_ref()
            };
            let Some(peer) = peer else {
                continue;
            };

            if matches!(mode.kind, ModeKind::Redirect | ModeKind::Redirect6) && !redir::SUPPORTED {
                warn!("{} not supported on this platform", mode);
                continue;
            }

            let local_addr = if mode.kind.is_udp() {
                let listen = tcp_bound
                    .get(&mode.listen)
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| listen_addr(&mode.listen));
                match UdpSocket::bind(&listen).await {
                    Ok(socket) => orchestrator.spawn_udp(&mode, socket, peer, config)?,
                    Err(e) => {
                        error!("Failed to listen on {}: {}", mode.listen, e);
                        continue;
                    }
                }
            } else {
                match TcpListener::bind(listen_addr(&mode.listen)).await {
                    Ok(listener) => {
                        let addr = orchestrator.spawn_tcp(&mode, listener, peer)?;
                        tcp_bound.insert(mode.listen.clone(), addr);
                        addr
                    }
                    Err(e) => {
                        error!("Failed to listen on {}: {}", mode.listen, e);
                        continue;
                    }
                }
            };

            if mode.kind.is_server() {
                info!("{} listening on {}", mode, local_addr);
            } else {
                info!("{} on {} <-> {}", mode, local_addr, peer.endpoint.addr);
            }
            orchestrator.bound.push(BoundMode { mode, local_addr });
        }

        Ok(orchestrator)
    }

    fn spawn_tcp(&self, mode: &ProxyMode, listener: TcpListener, peer: &Side) -> Result<SocketAddr> {
        let local_addr = listener.local_addr()?;
        let server = peer.endpoint.addr.clone();
        let cipher = peer.cipher.clone();
        let token = self.token.clone();

        let local = |resolver: Box<dyn Resolver>| -> Arc<dyn ConnectionHandler> {
            Arc::new(TcpLocal::new(resolver, server.clone(), cipher.clone(), token.clone()))
        };

        let handler: Arc<dyn ConnectionHandler> = match &mode.kind {
            ModeKind::Socks { udp } => local(Box::new(SocksHandshake { udp_enabled: *udp })),
            ModeKind::TcpTunnel { target } => local(Box::new(FixedTarget(target.clone()))),
            ModeKind::Redirect => local(Box::new(RedirectDerived { ipv6: false })),
            ModeKind::Redirect6 => local(Box::new(RedirectDerived { ipv6: true })),
            ModeKind::Server => Arc::new(TcpRemote::new(cipher.clone(), token.clone())),
            ModeKind::UdpSocks | ModeKind::UdpTunnel { .. } | ModeKind::UdpServer => {
                anyhow::bail!("{} is not a TCP mode", mode)
            }
        };

        self.tracker.spawn(serve(
            listener,
            self.token.clone(),
            self.tracker.clone(),
            handler,
        ));
        Ok(local_addr)
    }

    fn spawn_udp(
        &self,
        mode: &ProxyMode,
        socket: UdpSocket,
        peer: &Side,
        config: &Config,
    ) -> Result<SocketAddr> {
        let local_addr = socket.local_addr()?;
        let timeout = config.udp_timeout();
        let token = self.token.clone();
        let tracker = self.tracker.clone();

        let framing = match &mode.kind {
            ModeKind::UdpTunnel { target } => UdpFraming::Tunnel(target.clone()),
            ModeKind::UdpSocks => UdpFraming::Socks,
            ModeKind::UdpServer => {
                let relay = UdpRemote::new(socket, peer.cipher.clone(), timeout, token, tracker);
                self.tracker.spawn(relay.run());
                return Ok(local_addr);
            }
            _ => anyhow::bail!("{} is not a UDP mode", mode),
        };

        let relay = UdpLocal::new(
            socket,
            peer.endpoint.addr.clone(),
            framing,
            peer.cipher.clone(),
            timeout,
            token,
            tracker,
        );
        self.tracker.spawn(relay.run());
        Ok(local_addr)
    }

    /// The shared cancellation token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Every mode that is running, with its bound address
    pub fn bound(&self) -> &[BoundMode] {
        &self.bound
    }

    /// Bound address of the first running mode matching `pred`
    pub fn local_addr<F>(&self, pred: F) -> Option<SocketAddr>
    where
        F: Fn(&ModeKind) -> bool,
    {
        self.bound
            .iter()
            .find(|b| pred(&b.mode.kind))
            .map(|b| b.local_addr)
    }

    /// Cancel everything and wait until every started task has finished
    pub async fn shutdown(self) {
        info!("Shutting down {} listener(s)", self.bound.len());
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Shutdown complete");
    }
}
