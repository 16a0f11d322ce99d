//! Configuration record
//!
//! Defines the configuration structures for the client and server sides.
//! Both the TOML file and the command line produce a [`Config`].

use crate::helper::DEFAULT_UDP_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cipher name
fn default_cipher() -> String {
    "AEAD_CHACHA20_POLY1305".to_string()
}

/// Default UDP idle timeout in seconds
fn default_udp_timeout() -> u64 {
    DEFAULT_UDP_TIMEOUT_SECS
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Cipher name
    #[serde(default = "default_cipher")]
    pub cipher: String,

    /// Base64url-encoded key; derived from `password` when empty
    #[serde(default)]
    pub key: String,

    /// Password used to derive the key
    #[serde(default)]
    pub password: String,

    /// UDP NAT entry idle timeout in seconds
    #[serde(default = "default_udp_timeout")]
    pub udp_timeout: u64,

    /// Verbose logging
    #[serde(default)]
    pub verbose: bool,

    /// Client side, connecting to a server
    #[serde(default)]
    pub client: Option<ClientConfig>,

    /// Server side, accepting client connections
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cipher: default_cipher(),
            key: String::new(),
            password: String::new(),
            udp_timeout: default_udp_timeout(),
            verbose: false,
            client: None,
            server: None,
        }
    }
}

impl Config {
    /// UDP idle timeout as a duration
    pub fn udp_timeout(&self) -> Duration {
        Duration::from_secs(self.udp_timeout)
    }
}

/// Client configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address: `host:port` or `ss://cipher:password@host:port`
    pub server: String,

    /// SOCKS5 listen address
    #[serde(default)]
    pub socks: Option<String>,

    /// Also relay UDP for SOCKS clients (on the SOCKS listen address)
    #[serde(default)]
    pub udp_socks: bool,

    /// Transparent TCP redirect listen address
    #[serde(default)]
    pub redir: Option<String>,

    /// Transparent TCP redirect listen address for IPv6
    #[serde(default)]
    pub redir6: Option<String>,

    /// TCP tunnels: `laddr1=raddr1,laddr2=raddr2,...`
    #[serde(default)]
    pub tcp_tun: Option<String>,

    /// UDP tunnels: `laddr1=raddr1,laddr2=raddr2,...`
    #[serde(default)]
    pub udp_tun: Option<String>,
}

/// Server configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address (TCP and UDP): `host:port` or `ss://cipher:password@host:port`
    pub listen: String,
}
