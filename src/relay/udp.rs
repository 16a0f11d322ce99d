//! UDP relays
//!
//! Each client address gets a NAT entry: a dedicated outbound socket plus a
//! copy-back task that returns replies to the client. An entry is dropped
//! after `timeout` without replies, or when the token is cancelled.
//!
//! Payloads exchanged with the server are `addr ‖ data`: the destination on the
//! way out, the replying source on the way back.

use crate::cipher::{Cipher, ShadowSocket, MAX_PACKET_SIZE};
use crate::socks::{add_udp_header, strip_udp_header, Addr};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Client address → outbound socket
struct NatMap<T> {
    entries: Mutex<HashMap<SocketAddr, Arc<T>>>,
}

impl<T> NatMap<T> {
    fn new() -> Self {
        NatMap {
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, peer: &SocketAddr) -> Option<Arc<T>> {
        self.entries.lock().await.get(peer).cloned()
    }

    async fn insert(&self, peer: SocketAddr, entry: Arc<T>) {
        self.entries.lock().await.insert(peer, entry);
    }

    async fn remove(&self, peer: &SocketAddr) {
        self.entries.lock().await.remove(peer);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// State shared between a UDP relay and its copy-back tasks
struct Session<T> {
    nat: NatMap<T>,
    timeout: Duration,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl<T> Session<T> {
    fn new(timeout: Duration, token: CancellationToken, tracker: TaskTracker) -> Arc<Self> {
        Arc::new(Session {
            nat: NatMap::new(),
            timeout,
            token,
            tracker,
        })
    }
}

/// Bind an unconnected UDP socket of the same family as `peer`
async fn bind_for(peer: &SocketAddr) -> std::io::Result<UdpSocket> {
    if peer.is_ipv4() {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await
    } else {
        UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await
    }
}

/// Await `fut` unless `token` fires first
async fn until_cancelled<F: Future>(fut: F, token: &CancellationToken) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        r = fut => Some(r),
    }
}

/// How client datagrams are framed on a client-side UDP listener
#[derive(Debug, Clone)]
pub enum UdpFraming {
    /// Raw payloads, all sent to a fixed target
    Tunnel(Addr),
    /// SOCKS5 UDP requests carrying their own destination
    Socks,
}

impl UdpFraming {
    /// Turn a client datagram into the `addr ‖ data` sent to the server
    fn outbound(&self, datagram: &[u8]) -> Result<Vec<u8>> {
        match self {
            UdpFraming::Tunnel(target) => {
                let mut payload = target.to_bytes();
                payload.extend_from_slice(datagram);
                Ok(payload)
            }
            UdpFraming::Socks => Ok(strip_udp_header(datagram)?.to_vec()),
        }
    }

    /// Turn a server reply (`addr ‖ data`) into the datagram for the client
    fn inbound(&self, reply: &[u8]) -> Result<Vec<u8>> {
        match self {
            UdpFraming::Tunnel(_) => {
                let (_, len) = Addr::split(reply).context("Reply without source address")?;
                Ok(reply[len..].to_vec())
            }
            UdpFraming::Socks => Ok(add_udp_header(reply)),
        }
    }
}

/// Client-side UDP relay (tunnel or SOCKS UDP)
pub struct UdpLocal {
    socket: Arc<UdpSocket>,
    server: String,
    framing: UdpFraming,
    cipher: Cipher,
    session: Arc<Session<ShadowSocket>>,
}

impl UdpLocal {
    /// Create a relay for an already bound listen socket
    pub fn new(
        socket: UdpSocket,
        server: String,
        framing: UdpFraming,
        cipher: Cipher,
        timeout: Duration,
        token: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        UdpLocal {
            socket: Arc::new(socket),
            server,
            framing,
            cipher,
            session: Session::new(timeout, token, tracker),
        }
    }

    /// Receive client datagrams until cancelled
    pub async fn run(self) {
        let local = self
            .socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();

        let lookup = tokio::net::lookup_host(self.server.as_str());
        let server = match until_cancelled(lookup, &self.session.token).await {
            None => return,
            Some(Ok(mut addrs)) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    warn!("Server address {} resolved to nothing", self.server);
                    return;
                }
            },
            Some(Err(e)) => {
                warn!("Failed to resolve server address {}: {}", self.server, e);
                return;
            }
        };

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (n, peer) = tokio::select! {
                _ = self.session.token.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => match r {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("UDP read on {} failed: {}", local, e);
                        continue;
                    }
                },
            };

            let payload = match self.framing.outbound(&buf[..n]) {
                Ok(payload) => payload,
                Err(e) => {
                    debug!("Dropping UDP datagram from {}: {:#}", peer, e);
                    continue;
                }
            };

            let pc = match self.entry_for(peer, server).await {
                Ok(pc) => pc,
                Err(e) => {
                    warn!("No UDP relay for {}: {:#}", peer, e);
                    continue;
                }
            };

            if let Err(e) = pc.send_to(&payload, server).await {
                warn!("UDP write to server {} failed: {}", server, e);
            }
        }

        info!("UDP relay on {} stopped", local);
    }

    async fn entry_for(&self, peer: SocketAddr, server: SocketAddr) -> Result<Arc<ShadowSocket>> {
        if let Some(pc) = self.session.nat.get(&peer).await {
            return Ok(pc);
        }

        let socket = bind_for(&server).await.context("Failed to bind UDP socket")?;
        let pc = Arc::new(self.cipher.packet_conn(socket));
        self.session.nat.insert(peer, pc.clone()).await;
        debug!("UDP NAT entry {} <-> {}", peer, server);

        let session = self.session.clone();
        let socket = self.socket.clone();
        let framing = self.framing.clone();
        let entry = pc.clone();
        self.session.tracker.spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                let (n, _) = tokio::select! {
                    _ = session.token.cancelled() => break,
                    r = tokio::time::timeout(session.timeout, entry.recv_from(&mut buf)) => match r {
                        Err(_) => break,
                        Ok(Ok(r)) => r,
                        Ok(Err(e)) => {
                            debug!("UDP reply for {} dropped: {}", peer, e);
                            continue;
                        }
                    },
                };

                let datagram = match framing.inbound(&buf[..n]) {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        debug!("UDP reply for {} dropped: {:#}", peer, e);
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&datagram, peer).await {
                    debug!("UDP write to {} failed: {}", peer, e);
                    break;
                }
            }
            session.nat.remove(&peer).await;
            debug!("UDP NAT entry {} closed", peer);
        });

        Ok(pc)
    }
}

/// Server-side UDP relay
pub struct UdpRemote {
    listener: Arc<ShadowSocket>,
    session: Arc<Session<UdpSocket>>,
}

impl UdpRemote {
    /// Create a relay for an already bound listen socket
    pub fn new(
        socket: UdpSocket,
        cipher: Cipher,
        timeout: Duration,
        token: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        UdpRemote {
            listener: Arc::new(cipher.packet_conn(socket)),
            session: Session::new(timeout, token, tracker),
        }
    }

    /// Receive client datagrams until cancelled
    pub async fn run(self) {
        let local = self
            .listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!("listening UDP on {}", local);

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (n, peer) = tokio::select! {
                _ = self.session.token.cancelled() => break,
                r = self.listener.recv_from(&mut buf) => match r {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("UDP remote read error: {}", e);
                        continue;
                    }
                },
            };

            let (target, len) = match Addr::split(&buf[..n]) {
                Some(split) => split,
                None => {
                    debug!("Dropping UDP datagram from {}: no target address", peer);
                    continue;
                }
            };

            let target_addr = match until_cancelled(target.resolve(), &self.session.token).await {
                None => break,
                Some(Ok(addr)) => addr,
                Some(Err(e)) => {
                    debug!("Failed to resolve UDP target {}: {}", target, e);
                    continue;
                }
            };

            let pc = match self.entry_for(peer, target_addr).await {
                Ok(pc) => pc,
                Err(e) => {
                    warn!("No UDP relay for {}: {:#}", peer, e);
                    continue;
                }
            };

            if let Err(e) = pc.send_to(&buf[len..n], target_addr).await {
                debug!("UDP write to {} failed: {}", target_addr, e);
            }
        }

        info!("UDP relay on {} stopped", local);
    }

    async fn entry_for(&self, peer: SocketAddr, target: SocketAddr) -> Result<Arc<UdpSocket>> {
        if let Some(pc) = self.session.nat.get(&peer).await {
            return Ok(pc);
        }

        // The socket family follows the first target of this client.
        let pc = Arc::new(bind_for(&target).await.context("Failed to bind UDP socket")?);
        self.session.nat.insert(peer, pc.clone()).await;
        debug!("UDP NAT entry {} <-> {}", peer, target);

        let session = self.session.clone();
        let listener = self.listener.clone();
        let entry = pc.clone();
        self.session.tracker.spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                let (n, from) = tokio::select! {
                    _ = session.token.cancelled() => break,
                    r = tokio::time::timeout(session.timeout, entry.recv_from(&mut buf)) => match r {
                        Err(_) => break,
                        Ok(Ok(r)) => r,
                        Ok(Err(e)) => {
                            debug!("UDP reply for {} dropped: {}", peer, e);
                            continue;
                        }
                    },
                };

                let mut payload = Addr::from(from).to_bytes();
                payload.extend_from_slice(&buf[..n]);
                if let Err(e) = listener.send_to(&payload, peer).await {
                    debug!("UDP write to {} failed: {}", peer, e);
                    break;
                }
            }
            session.nat.remove(&peer).await;
            debug!("UDP NAT entry {} closed", peer);
        });

        Ok(pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::pick_cipher;
    use std::time::Instant;

    #[tokio::test]
    async fn test_slow_lookup_yields_to_cancellation() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let never = std::future::pending::<std::io::Result<SocketAddr>>();
        assert!(until_cancelled(never, &token).await.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));

        let ready = until_cancelled(async { 7 }, &CancellationToken::new()).await;
        assert_eq!(ready, Some(7));
    }

    #[tokio::test]
    async fn test_local_run_stops_before_server_lookup_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let relay = UdpLocal::new(
            UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            "server.invalid:8488".to_string(),
            UdpFraming::Socks,
            pick_cipher("DUMMY", &[], "").unwrap(),
            Duration::from_secs(5),
            token,
            TaskTracker::new(),
        );
        tokio::time::timeout(Duration::from_secs(1), relay.run())
            .await
            .expect("run should return at once");
    }

    async fn udp_echo() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], from).await;
            }
        });
        addr
    }

    #[test]
    fn test_tunnel_framing() {
        let target = Addr::parse("127.0.0.1:53").unwrap();
        let framing = UdpFraming::Tunnel(target.clone());

        let out = framing.outbound(b"query").unwrap();
        assert_eq!(&out[..target.encoded_len()], target.to_bytes().as_slice());
        assert_eq!(&out[target.encoded_len()..], b"query");

        assert_eq!(framing.inbound(&out).unwrap(), b"query");
        assert!(framing.inbound(&[0x09]).is_err());
    }

    #[test]
    fn test_socks_framing() {
        let framing = UdpFraming::Socks;
        let mut request = vec![0, 0, 0];
        request.extend_from_slice(&Addr::parse("10.0.0.1:53").unwrap().to_bytes());
        request.extend_from_slice(b"q");

        let out = framing.outbound(&request).unwrap();
        assert_eq!(out, &request[3..]);
        assert_eq!(framing.inbound(&out).unwrap(), request);

        request[2] = 1;
        assert!(framing.outbound(&request).is_err());
    }

    #[tokio::test]
    async fn test_nat_map() {
        let nat: NatMap<u8> = NatMap::new();
        let peer: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        assert!(nat.get(&peer).await.is_none());
        nat.insert(peer, Arc::new(7)).await;
        assert_eq!(*nat.get(&peer).await.unwrap(), 7);
        assert_eq!(nat.len().await, 1);
        nat.remove(&peer).await;
        assert_eq!(nat.len().await, 0);
    }

    #[tokio::test]
    async fn test_tunnel_through_server() {
        let echo = udp_echo().await;
        let cipher = pick_cipher("AEAD_AES_128_GCM", &[], "udp-test").unwrap();
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();
        let remote = UdpRemote::new(
            server_socket,
            cipher.clone(),
            Duration::from_secs(5),
            token.clone(),
            tracker.clone(),
        );
        tracker.spawn(remote.run());

        let local_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local_addr = local_socket.local_addr().unwrap();
        let local = UdpLocal::new(
            local_socket,
            server_addr.to_string(),
            UdpFraming::Tunnel(Addr::from(echo)),
            cipher,
            Duration::from_secs(5),
            token.clone(),
            tracker.clone(),
        );
        tracker.spawn(local.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"over udp", local_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"over udp");
        assert_eq!(from, local_addr);

        token.cancel();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("UDP relays should stop on cancellation");
    }

    #[tokio::test]
    async fn test_nat_entry_expires() {
        let echo = udp_echo().await;
        let cipher = pick_cipher("DUMMY", &[], "").unwrap();
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = UdpRemote::new(
            server_socket,
            cipher.clone(),
            Duration::from_millis(100),
            token.clone(),
            tracker.clone(),
        );
        let listener = remote.listener.clone();
        let session = remote.session.clone();
        let server_addr = listener.local_addr().unwrap();
        tracker.spawn(remote.run());

        let client = cipher.packet_conn(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let mut payload = Addr::from(echo).to_bytes();
        payload.extend_from_slice(b"x");
        client.send_to(&payload, server_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], payload.as_slice());
        assert_eq!(session.nat.len().await, 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(session.nat.len().await, 0);

        token.cancel();
        tracker.close();
        tracker.wait().await;
    }
}
