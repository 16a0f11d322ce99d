//! Helper utilities for Sockshade
//!
//! Shared constants, socket options and the cancellable dial used by every
//! relay mode.

use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Default buffer size for relay IO
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default idle timeout for UDP NAT entries in seconds
pub const DEFAULT_UDP_TIMEOUT_SECS: u64 = 300;

/// Pause after a failed accept before trying again
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Socket options applied to accepted and dialed TCP connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive idle time
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive probe interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(15),
            keepalive_interval: Some(15),
        }
    }
}

impl SocketOpts {
    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Connect to `addr`, giving up as soon as `token` is cancelled.
pub async fn dial(addr: &str, token: &CancellationToken) -> io::Result<TcpStream> {
    let stream = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(crate::error::Cancelled::io_error()),
        r = TcpStream::connect(addr) => r?,
    };
    SocketOpts::default().apply(&stream)?;
    Ok(stream)
}
