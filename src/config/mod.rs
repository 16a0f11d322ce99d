//! Configuration module for Sockshade
//!
//! This module provides configuration types and parsing for the client and
//! server sides, and turns a configuration into the list of proxy modes to run.

mod client;
mod mode;

pub use client::{ClientConfig, Config, ServerConfig};
pub use mode::{parse_endpoint, parse_tunnels, Endpoint, ModeKind, ProxyMode, SS_URL_PREFIX};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_client_config() {
        let config_str = r#"
password = "secret"

[client]
server = "server.example.com:8488"
socks = "127.0.0.1:1080"
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.cipher, "AEAD_CHACHA20_POLY1305");
        assert_eq!(config.password, "secret");
        assert_eq!(config.udp_timeout, 300);

        let client = config.client.as_ref().unwrap();
        assert_eq!(client.server, "server.example.com:8488");
        assert_eq!(client.socks.as_deref(), Some("127.0.0.1:1080"));
        assert!(!client.udp_socks);
        assert!(config.server.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
cipher = "AEAD_AES_256_GCM"
key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
udp_timeout = 60
verbose = true

[client]
server = "ss://AEAD_AES_128_GCM:pw@127.0.0.1:8488"
socks = "127.0.0.1:1080"
udp_socks = true
redir = "127.0.0.1:1081"
redir6 = "[::1]:1082"
tcp_tun = "127.0.0.1:5000=10.0.0.1:80"
udp_tun = "127.0.0.1:5353=8.8.8.8:53"

[server]
listen = "0.0.0.0:8488"
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.udp_timeout, 60);
        assert!(config.verbose);
        assert_eq!(config.key_bytes().unwrap().len(), 32);

        let client = config.client_endpoint().unwrap().unwrap();
        assert_eq!(client.cipher, "AEAD_AES_128_GCM");
        assert_eq!(client.addr, "127.0.0.1:8488");

        let server = config.server_endpoint().unwrap().unwrap();
        assert_eq!(server.cipher, "AEAD_AES_256_GCM");

        assert_eq!(config.modes().unwrap().len(), 8);
    }

    #[test]
    fn test_parse_invalid_config() {
        assert!(parse_config("udp_timeout = \"soon\"").is_err());
        assert!(parse_config("[client]\nsocks = \"127.0.0.1:1080\"").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "password = \"pw\"\n[server]\nlisten = \"127.0.0.1:8488\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.unwrap().listen, "127.0.0.1:8488");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/sockshade.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
