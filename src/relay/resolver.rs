//! Destination resolvers for client-side TCP modes

use super::watcher::Watched;
use crate::redir;
use crate::socks::{self, Addr, Request};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpStream;

/// What a resolver decided for one accepted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Dial the server and relay to this destination
    Target(Addr),
    /// SOCKS UDP ASSOCIATE: keep the control connection open, relay nothing
    UdpAssociate,
}

/// Finds the true destination of an accepted connection
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Resolve the destination, possibly exchanging bytes with the client
    async fn resolve(&self, conn: &mut Watched<TcpStream>) -> Result<Resolved>;

    /// Short label used in logs
    fn describe(&self) -> String;
}

/// Destination comes from a SOCKS5 handshake
#[derive(Debug, Clone)]
pub struct SocksHandshake {
    /// Whether UDP ASSOCIATE is accepted
    pub udp_enabled: bool,
}

#[async_trait]
impl Resolver for SocksHandshake {
    async fn resolve(&self, conn: &mut Watched<TcpStream>) -> Result<Resolved> {
        // UDP relays listen on the same address as the TCP listener.
        let bind_addr = conn
            .get_ref()
            .and_then(|s| s.local_addr().ok())
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

        match socks::handshake(conn, self.udp_enabled, bind_addr).await? {
            Request::Connect(addr) => Ok(Resolved::Target(addr)),
            Request::UdpAssociate(_) => Ok(Resolved::UdpAssociate),
        }
    }

    fn describe(&self) -> String {
        "SOCKS proxy".to_string()
    }
}

/// Destination is fixed by configuration
#[derive(Debug, Clone)]
pub struct FixedTarget(pub Addr);

#[async_trait]
impl Resolver for FixedTarget {
    async fn resolve(&self, _conn: &mut Watched<TcpStream>) -> Result<Resolved> {
        Ok(Resolved::Target(self.0.clone()))
    }

    fn describe(&self) -> String {
        format!("TCP tunnel to {}", self.0)
    }
}

/// Destination is the pre-redirect address of the connection
#[derive(Debug, Clone)]
pub struct RedirectDerived {
    /// Use the IPv6 lookup
    pub ipv6: bool,
}

#[async_trait]
impl Resolver for RedirectDerived {
    async fn resolve(&self, conn: &mut Watched<TcpStream>) -> Result<Resolved> {
        let stream = conn
            .get_ref()
            .ok_or_else(crate::error::Cancelled::io_error)?;
        let dst = redir::original_dst(stream, self.ipv6)
            .context("Failed to read original destination")?;
        Ok(Resolved::Target(Addr::from(dst)))
    }

    fn describe(&self) -> String {
        if self.ipv6 {
            "TCP6 redirect".to_string()
        } else {
            "TCP redirect".to_string()
        }
    }
}
