//! Wire address encoding
//!
//! Destination addresses travel inside the encrypted channel in the same
//! compact form SOCKS5 uses in its requests:
//!
//! ```text
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! +------+----------+----------+
//! ```

use super::consts::*;
use crate::error::Socks5Error;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Destination address: an IP socket address or a domain name with port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl Addr {
    /// Create an address from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Addr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create an address from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        Addr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Parse a `host:port` literal.
    ///
    /// IPv6 hosts must be bracketed (`[::1]:53`). Returns `None` for anything
    /// that cannot be encoded, which callers treat as a configuration error.
    pub fn parse(literal: &str) -> Option<Addr> {
        if let Ok(addr) = literal.parse::<SocketAddr>() {
            return Some(Addr::Ip(addr));
        }

        let (host, port) = literal.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        if host.is_empty() || host.len() > MAX_DOMAIN_LEN || host.contains(':') {
            return None;
        }
        if host.starts_with('[') || host.ends_with(']') {
            return None;
        }

        Some(Addr::Domain(host.to_string(), port))
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            Addr::Ip(addr) => addr.port(),
            Addr::Domain(_, port) => *port,
        }
    }

    /// Get the address type byte
    pub fn addr_type(&self) -> u8 {
        match self {
            Addr::Ip(SocketAddr::V4(_)) => SOCKS5_ADDR_TYPE_IPV4,
            Addr::Ip(SocketAddr::V6(_)) => SOCKS5_ADDR_TYPE_IPV6,
            Addr::Domain(_, _) => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }

    /// Length of the wire encoding
    pub fn encoded_len(&self) -> usize {
        match self {
            Addr::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            Addr::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            Addr::Domain(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// Serialize to the wire encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());

        match self {
            Addr::Ip(SocketAddr::V4(addr)) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV4);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            Addr::Ip(SocketAddr::V6(addr)) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV6);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            Addr::Domain(domain, port) => {
                bytes.push(SOCKS5_ADDR_TYPE_DOMAIN);
                bytes.push(domain.len() as u8);
                bytes.extend_from_slice(domain.as_bytes());
                bytes.extend_from_slice(&port.to_be_bytes());
            }
        }

        bytes
    }

    /// Read a wire-encoded address from a stream
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Addr>
    where
        R: AsyncRead + Unpin,
    {
        let addr_type = reader.read_u8().await?;
        Self::read_body(reader, addr_type).await
    }

    /// Read the remainder of an address whose type byte was already consumed
    pub(crate) async fn read_body<R>(reader: &mut R, addr_type: u8) -> io::Result<Addr>
    where
        R: AsyncRead + Unpin,
    {
        match addr_type {
            SOCKS5_ADDR_TYPE_IPV4 => {
                let mut ip = [0u8; 4];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Ok(Addr::ipv4(Ipv4Addr::from(ip), port))
            }

            SOCKS5_ADDR_TYPE_DOMAIN => {
                let len = reader.read_u8().await? as usize;
                if len == 0 {
                    return Err(invalid_data(Socks5Error::InvalidDomain(String::new())));
                }
                let mut domain = vec![0u8; len];
                reader.read_exact(&mut domain).await?;
                let domain = String::from_utf8(domain).map_err(|e| {
                    invalid_data(Socks5Error::InvalidDomain(
                        String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    ))
                })?;
                let port = reader.read_u16().await?;
                Ok(Addr::Domain(domain, port))
            }

            SOCKS5_ADDR_TYPE_IPV6 => {
                let mut ip = [0u8; 16];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Ok(Addr::ipv6(Ipv6Addr::from(ip), port))
            }

            other => Err(invalid_data(Socks5Error::AddressTypeNotSupported(other))),
        }
    }

    /// Split a wire-encoded address off the front of a datagram.
    ///
    /// Returns the address and the number of bytes it occupied, or `None`
    /// if the buffer does not start with a complete valid address.
    pub fn split(buf: &[u8]) -> Option<(Addr, usize)> {
        let (&addr_type, rest) = buf.split_first()?;

        match addr_type {
            SOCKS5_ADDR_TYPE_IPV4 => {
                if rest.len() < 6 {
                    return None;
                }
                let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
                let port = u16::from_be_bytes([rest[4], rest[5]]);
                Some((Addr::ipv4(ip, port), 1 + 6))
            }

            SOCKS5_ADDR_TYPE_DOMAIN => {
                let (&len, rest) = rest.split_first()?;
                let len = len as usize;
                if len == 0 || rest.len() < len + 2 {
                    return None;
                }
                let domain = std::str::from_utf8(&rest[..len]).ok()?.to_string();
                let port = u16::from_be_bytes([rest[len], rest[len + 1]]);
                Some((Addr::Domain(domain, port), 1 + 1 + len + 2))
            }

            SOCKS5_ADDR_TYPE_IPV6 => {
                if rest.len() < 18 {
                    return None;
                }
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&rest[..16]);
                let port = u16::from_be_bytes([rest[16], rest[17]]);
                Some((Addr::ipv6(Ipv6Addr::from(ip), port), 1 + 18))
            }

            _ => None,
        }
    }

    /// Resolve the address to a SocketAddr
    ///
    /// For IP addresses, this returns immediately.
    /// For domain names, this performs DNS resolution.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            Addr::Ip(addr) => Ok(*addr),
            Addr::Domain(domain, port) => tokio::net::lookup_host((domain.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("No addresses found for domain: {}", domain),
                    )
                }),
        }
    }
}

fn invalid_data(err: Socks5Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Ip(addr) => write!(f, "{}", addr),
            Addr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Addr::Ip(addr)
    }
}
