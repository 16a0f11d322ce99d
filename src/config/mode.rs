//! Proxy modes derived from a [`Config`]
//!
//! Everything that can be wrong with a configuration is caught here, before
//! any listener is started.

use super::Config;
use crate::cipher::{decode_key, CipherKind};
use crate::error::SockshadeError;
use crate::socks::Addr;
use percent_encoding::percent_decode_str;
use std::fmt;
use url::Url;

/// Prefix of the URL form of a server address
pub const SS_URL_PREFIX: &str = "ss://";

/// A peer address with the cipher settings it implies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host:port`
    pub addr: String,
    /// Cipher name
    pub cipher: String,
    /// Password (empty when a key is used)
    pub password: String,
}

/// Parse `host:port` or `ss://cipher:password@host:port`.
///
/// The URL form overrides `cipher` and `password`. Both are percent-decoded,
/// so a password containing `@`, `:` or `/` can be given encoded.
pub fn parse_endpoint(s: &str, cipher: &str, password: &str) -> Result<Endpoint, SockshadeError> {
    if !s.starts_with(SS_URL_PREFIX) {
        return Ok(Endpoint {
            addr: s.to_string(),
            cipher: cipher.to_string(),
            password: password.to_string(),
        });
    }

    let url = Url::parse(s)
        .map_err(|e| SockshadeError::Config(format!("invalid server URL {}: {}", s, e)))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SockshadeError::Config(format!("server URL {} has no host", s)))?;
    let port = url
        .port()
        .ok_or_else(|| SockshadeError::Config(format!("server URL {} has no port", s)))?;

    let mut endpoint = Endpoint {
        addr: format!("{}:{}", host, port),
        cipher: cipher.to_string(),
        password: password.to_string(),
    };
    if !url.username().is_empty() {
        endpoint.cipher = decode_userinfo(url.username())?;
        endpoint.password = decode_userinfo(url.password().unwrap_or_default())?;
    }
    Ok(endpoint)
}

fn decode_userinfo(raw: &str) -> Result<String, SockshadeError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| SockshadeError::Config(format!("invalid server URL userinfo: {}", e)))
}

/// Parse `laddr1=raddr1,laddr2=raddr2,...` into (listen, target) pairs
pub fn parse_tunnels(list: &str) -> Result<Vec<(String, Addr)>, SockshadeError> {
    list.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (listen, target) = pair.split_once('=').ok_or_else(|| {
                SockshadeError::Config(format!("invalid tunnel {:?}, expected laddr=raddr", pair))
            })?;
            let addr = Addr::parse(target.trim()).ok_or_else(|| {
                SockshadeError::Config(format!("invalid target address {:?}", target))
            })?;
            Ok((listen.trim().to_string(), addr))
        })
        .collect()
}

/// What a listener does with its traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeKind {
    /// SOCKS5 front-end; `udp` enables UDP ASSOCIATE
    Socks {
        /// Accept UDP ASSOCIATE
        udp: bool,
    },
    /// SOCKS5 UDP relay on the SOCKS listen address
    UdpSocks,
    /// Static TCP tunnel
    TcpTunnel {
        /// Fixed destination
        target: Addr,
    },
    /// Static UDP tunnel
    UdpTunnel {
        /// Fixed destination
        target: Addr,
    },
    /// Transparent TCP redirect
    Redirect,
    /// Transparent TCP redirect for IPv6
    Redirect6,
    /// Server side, TCP
    Server,
    /// Server side, UDP
    UdpServer,
}

impl ModeKind {
    /// Whether this mode accepts connections from clients of this program
    pub fn is_server(&self) -> bool {
        matches!(self, ModeKind::Server | ModeKind::UdpServer)
    }

    /// Whether this mode listens on UDP
    pub fn is_udp(&self) -> bool {
        matches!(
            self,
            ModeKind::UdpSocks | ModeKind::UdpTunnel { .. } | ModeKind::UdpServer
        )
    }
}

/// One listener to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyMode {
    /// What the listener does
    pub kind: ModeKind,
    /// Listen address
    pub listen: String,
}

impl ProxyMode {
    fn new(kind: ModeKind, listen: &str) -> Self {
        ProxyMode {
            kind,
            listen: listen.to_string(),
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ModeKind::Socks { .. } => write!(f, "SOCKS proxy {}", self.listen),
            ModeKind::UdpSocks => write!(f, "SOCKS UDP {}", self.listen),
            ModeKind::TcpTunnel { target } => write!(f, "TCP tunnel {} <-> {}", self.listen, target),
            ModeKind::UdpTunnel { target } => write!(f, "UDP tunnel {} <-> {}", self.listen, target),
            ModeKind::Redirect => write!(f, "TCP redirect {}", self.listen),
            ModeKind::Redirect6 => write!(f, "TCP6 redirect {}", self.listen),
            ModeKind::Server => write!(f, "TCP server {}", self.listen),
            ModeKind::UdpServer => write!(f, "UDP server {}", self.listen),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Client endpoint, with any URL override applied
    pub fn client_endpoint(&self) -> Result<Option<Endpoint>, SockshadeError> {
        self.client
            .as_ref()
            .map(|client| parse_endpoint(&client.server, &self.cipher, &self.password))
            .transpose()
    }

    /// Server endpoint, with any URL override applied
    pub fn server_endpoint(&self) -> Result<Option<Endpoint>, SockshadeError> {
        self.server
            .as_ref()
            .map(|server| parse_endpoint(&server.listen, &self.cipher, &self.password))
            .transpose()
    }

    /// Decoded `key`, empty when unset
    pub fn key_bytes(&self) -> Result<Vec<u8>, SockshadeError> {
        if self.key.trim().is_empty() {
            Ok(Vec::new())
        } else {
            decode_key(&self.key)
        }
    }

    /// Check the configuration without starting anything
    pub fn validate(&self) -> Result<(), SockshadeError> {
        if self.client.is_none() && self.server.is_none() {
            return Err(SockshadeError::Config(
                "neither a client nor a server is configured".to_string(),
            ));
        }

        let key = self.key_bytes()?;
        let endpoints = [self.client_endpoint()?, self.server_endpoint()?];
        for endpoint in endpoints.iter().flatten() {
            if endpoint.addr.trim().is_empty() {
                return Err(SockshadeError::Config("empty server address".to_string()));
            }
            let kind = CipherKind::from_name(&endpoint.cipher).ok_or_else(|| {
                SockshadeError::Cipher(format!("unknown cipher '{}'", endpoint.cipher))
            })?;
            if kind.is_aead() && key.is_empty() && endpoint.password.is_empty() {
                return Err(SockshadeError::Cipher(format!(
                    "{} requires a key or a password",
                    kind
                )));
            }
        }

        self.modes().map(|_| ())
    }

    /// Every listener this configuration asks for
    pub fn modes(&self) -> Result<Vec<ProxyMode>, SockshadeError> {
        let mut modes = Vec::new();

        if let Some(client) = &self.client {
            if let Some(listen) = non_empty(&client.udp_tun) {
                for (local, target) in parse_tunnels(listen)? {
                    modes.push(ProxyMode::new(ModeKind::UdpTunnel { target }, &local));
                }
            }
            if let Some(listen) = non_empty(&client.tcp_tun) {
                for (local, target) in parse_tunnels(listen)? {
                    modes.push(ProxyMode::new(ModeKind::TcpTunnel { target }, &local));
                }
            }
            if let Some(listen) = non_empty(&client.socks) {
                modes.push(ProxyMode::new(
                    ModeKind::Socks {
                        udp: client.udp_socks,
                    },
                    listen,
                ));
                if client.udp_socks {
                    modes.push(ProxyMode::new(ModeKind::UdpSocks, listen));
                }
            }
            if let Some(listen) = non_empty(&client.redir) {
                modes.push(ProxyMode::new(ModeKind::Redirect, listen));
            }
            if let Some(listen) = non_empty(&client.redir6) {
                modes.push(ProxyMode::new(ModeKind::Redirect6, listen));
            }
        }

        if let Some(endpoint) = self.server_endpoint()? {
            modes.push(ProxyMode::new(ModeKind::Server, &endpoint.addr));
            modes.push(ProxyMode::new(ModeKind::UdpServer, &endpoint.addr));
        }

        Ok(modes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ServerConfig};

    fn client_config(client: ClientConfig) -> Config {
        Config {
            password: "pw".to_string(),
            client: Some(client),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_endpoint_plain() {
        let ep = parse_endpoint("example.com:8488", "AES-128-GCM", "pw").unwrap();
        assert_eq!(ep.addr, "example.com:8488");
        assert_eq!(ep.cipher, "AES-128-GCM");
        assert_eq!(ep.password, "pw");
    }

    #[test]
    fn test_parse_endpoint_url_overrides() {
        let ep = parse_endpoint(
            "ss://AEAD_AES_256_GCM:s3cret@127.0.0.1:8488",
            "AEAD_CHACHA20_POLY1305",
            "other",
        )
        .unwrap();
        assert_eq!(ep.addr, "127.0.0.1:8488");
        assert_eq!(ep.cipher, "AEAD_AES_256_GCM");
        assert_eq!(ep.password, "s3cret");
    }

    #[test]
    fn test_parse_endpoint_url_decodes_userinfo() {
        let ep = parse_endpoint(
            "ss://AEAD_CHACHA20_POLY1305:p%40ss%3Aw0rd%2F@127.0.0.1:8488",
            "",
            "",
        )
        .unwrap();
        assert_eq!(ep.cipher, "AEAD_CHACHA20_POLY1305");
        assert_eq!(ep.password, "p@ss:w0rd/");
        assert_eq!(ep.addr, "127.0.0.1:8488");

        let err = parse_endpoint("ss://AEAD_AES_128_GCM:%FF%FE@127.0.0.1:8488", "", "").unwrap_err();
        assert!(matches!(err, SockshadeError::Config(_)));
    }

    #[test]
    fn test_parse_endpoint_url_ipv6() {
        let ep = parse_endpoint("ss://DUMMY:x@[::1]:8488", "", "").unwrap();
        assert_eq!(ep.addr, "[::1]:8488");
    }

    #[test]
    fn test_parse_endpoint_url_errors() {
        assert!(parse_endpoint("ss://AEAD_AES_128_GCM:pw@host", "", "").is_err());
        assert!(parse_endpoint("ss://", "", "").is_err());
    }

    #[test]
    fn test_parse_tunnels() {
        let pairs = parse_tunnels("127.0.0.1:1090=8.8.8.8:53, :1091=example.com:443").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "127.0.0.1:1090");
        assert_eq!(pairs[0].1, Addr::parse("8.8.8.8:53").unwrap());
        assert_eq!(pairs[1].0, ":1091");
        assert_eq!(pairs[1].1, Addr::Domain("example.com".to_string(), 443));
    }

    #[test]
    fn test_parse_tunnels_errors() {
        assert!(parse_tunnels("127.0.0.1:1090").is_err());
        assert!(parse_tunnels("127.0.0.1:1090=nonsense").is_err());
    }

    #[test]
    fn test_modes_client() {
        let config = client_config(ClientConfig {
            server: "127.0.0.1:8488".to_string(),
            socks: Some("127.0.0.1:1080".to_string()),
            udp_socks: true,
            tcp_tun: Some("127.0.0.1:5000=10.0.0.1:80,127.0.0.1:5001=10.0.0.2:80".to_string()),
            udp_tun: Some("127.0.0.1:5353=8.8.8.8:53".to_string()),
            ..Default::default()
        });

        let modes = config.modes().unwrap();
        assert_eq!(modes.len(), 5);
        assert!(modes.contains(&ProxyMode::new(ModeKind::Socks { udp: true }, "127.0.0.1:1080")));
        assert!(modes.contains(&ProxyMode::new(ModeKind::UdpSocks, "127.0.0.1:1080")));
        assert_eq!(
            modes.iter().filter(|m| matches!(m.kind, ModeKind::TcpTunnel { .. })).count(),
            2
        );
        assert!(modes.iter().all(|m| !m.kind.is_server()));
        config.validate().unwrap();
    }

    #[test]
    fn test_modes_server_from_url() {
        let config = Config {
            server: Some(ServerConfig {
                listen: "ss://AEAD_AES_128_GCM:pw@0.0.0.0:8488".to_string(),
            }),
            ..Default::default()
        };

        let modes = config.modes().unwrap();
        assert_eq!(modes.len(), 2);
        assert!(modes.iter().all(|m| m.kind.is_server() && m.listen == "0.0.0.0:8488"));
        assert_eq!(modes.iter().filter(|m| m.kind.is_udp()).count(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_errors() {
        assert!(Config::default().validate().is_err());

        let mut config = client_config(ClientConfig {
            server: "127.0.0.1:8488".to_string(),
            ..Default::default()
        });
        config.cipher = "RC4".to_string();
        assert!(matches!(config.validate(), Err(SockshadeError::Cipher(_))));

        config.cipher = "AEAD_AES_128_GCM".to_string();
        config.password.clear();
        assert!(config.validate().is_err());

        config.key = "%%%".to_string();
        assert!(config.validate().is_err());

        config.key = crate::cipher::generate_key(16);
        config.validate().unwrap();
    }

    #[test]
    fn test_display() {
        let mode = ProxyMode::new(
            ModeKind::TcpTunnel {
                target: Addr::parse("10.0.0.1:80").unwrap(),
            },
            ":5000",
        );
        assert_eq!(mode.to_string(), "TCP tunnel :5000 <-> 10.0.0.1:80");
    }
}
