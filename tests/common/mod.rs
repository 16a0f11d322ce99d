//! Test utilities for Sockshade
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use sockshade::config::{ClientConfig, Config, ServerConfig};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A loopback address with a port that was free a moment ago
pub fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Start a TCP echo server
pub async fn start_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Start a TCP server that accepts and then never reads or writes
pub async fn start_silent_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Start a UDP echo server
pub async fn start_udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// Test configuration builder
pub struct TestConfigBuilder {
    cipher: String,
    password: String,
    udp_timeout: u64,
    client: Option<ClientConfig>,
    server: Option<String>,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            cipher: "AEAD_CHACHA20_POLY1305".to_string(),
            password: "test-password".to_string(),
            udp_timeout: 300,
            client: None,
            server: None,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cipher
    pub fn cipher(mut self, cipher: &str) -> Self {
        self.cipher = cipher.to_string();
        self
    }

    /// Set password
    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Set UDP idle timeout
    pub fn udp_timeout(mut self, secs: u64) -> Self {
        self.udp_timeout = secs;
        self
    }

    /// Run a server on this address
    pub fn server(mut self, listen: SocketAddr) -> Self {
        self.server = Some(listen.to_string());
        self
    }

    /// Run a client talking to this server
    pub fn client(mut self, server: SocketAddr) -> Self {
        self.client = Some(ClientConfig {
            server: server.to_string(),
            ..Default::default()
        });
        self
    }

    /// Add a SOCKS listener to the client
    pub fn socks(mut self, listen: SocketAddr, udp: bool) -> Self {
        let client = self.client.get_or_insert_with(Default::default);
        client.socks = Some(listen.to_string());
        client.udp_socks = udp;
        self
    }

    /// Add a TCP tunnel to the client
    pub fn tcp_tun(mut self, listen: SocketAddr, target: SocketAddr) -> Self {
        let client = self.client.get_or_insert_with(Default::default);
        client.tcp_tun = Some(format!("{}={}", listen, target));
        self
    }

    /// Add a UDP tunnel to the client
    pub fn udp_tun(mut self, listen: SocketAddr, target: SocketAddr) -> Self {
        let client = self.client.get_or_insert_with(Default::default);
        client.udp_tun = Some(format!("{}={}", listen, target));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        Config {
            cipher: self.cipher,
            password: self.password,
            udp_timeout: self.udp_timeout,
            client: self.client,
            server: self.server.map(|listen| ServerConfig { listen }),
            ..Default::default()
        }
    }
}

/// Minimal SOCKS5 client
pub mod socks5_client {
    use super::*;
    use sockshade::socks::*;

    /// Create a no-auth method selection request
    pub fn create_auth_request_no_auth() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// Create a request for `cmd` to an address
    pub fn create_request(cmd: u8, addr: &Addr) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED];
        request.extend_from_slice(&addr.to_bytes());
        request
    }

    /// Negotiate and send a request, returning the stream and the bound address
    pub async fn request(proxy: SocketAddr, cmd: u8, addr: &Addr) -> (TcpStream, Addr) {
        let mut stream = TcpStream::connect(proxy).await.unwrap();
        stream
            .write_all(&create_auth_request_no_auth())
            .await
            .unwrap();
        let mut method = [0u8; 2];
        stream.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]);

        stream.write_all(&create_request(cmd, addr)).await.unwrap();
        let mut head = [0u8; 3];
        stream.read_exact(&mut head).await.unwrap();
        assert_eq!(head[1], SOCKS5_REPLY_SUCCEEDED);
        let bound = Addr::read_from(&mut stream).await.unwrap();
        (stream, bound)
    }

    /// CONNECT through the proxy
    pub async fn connect(proxy: SocketAddr, target: SocketAddr) -> TcpStream {
        request(proxy, SOCKS5_CMD_TCP_CONNECT, &Addr::from(target)).await.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_server() {
        let addr = start_echo_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_config_builder() {
        let server = free_addr();
        let config = TestConfigBuilder::new()
            .cipher("AEAD_AES_128_GCM")
            .server(server)
            .client(server)
            .socks(free_addr(), true)
            .build();

        assert_eq!(config.cipher, "AEAD_AES_128_GCM");
        assert_eq!(config.server.as_ref().unwrap().listen, server.to_string());
        assert!(config.client.as_ref().unwrap().udp_socks);
        config.validate().unwrap();
    }

    #[test]
    fn test_socks5_connect_request() {
        let cmd = socks5_client::create_request(
            sockshade::socks::SOCKS5_CMD_TCP_CONNECT,
            &sockshade::socks::Addr::parse("192.168.1.1:8080").unwrap(),
        );
        assert_eq!(cmd[0], 5); // SOCKS5 version
        assert_eq!(cmd[1], 1); // CONNECT
        assert_eq!(cmd[3], 1); // IPv4
        assert_eq!(&cmd[4..8], &[192, 168, 1, 1]);
    }
}
