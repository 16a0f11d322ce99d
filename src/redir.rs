//! Original destination of a redirected connection
//!
//! Connections redirected by netfilter (`iptables -j REDIRECT`) keep their
//! intended destination in `SO_ORIGINAL_DST` (IPv4) or `IP6T_SO_ORIGINAL_DST`
//! (IPv6). Only Linux exposes these.

use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Whether transparent redirect can work on this platform
pub const SUPPORTED: bool = cfg!(any(target_os = "linux", target_os = "android"));

/// Read the pre-redirect destination of an accepted connection
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn original_dst(stream: &TcpStream, ipv6: bool) -> io::Result<SocketAddr> {
    let socket = socket2::SockRef::from(stream);
    let addr = if ipv6 {
        socket.original_dst_ipv6()?
    } else {
        socket.original_dst()?
    };

    addr.as_socket().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "original destination is not an IP address",
        )
    })
}

/// Read the pre-redirect destination of an accepted connection
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn original_dst(_stream: &TcpStream, _ipv6: bool) -> io::Result<SocketAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "transparent redirect is only supported on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_original_dst_without_redirect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        match original_dst(&accepted, false) {
            // No NAT entry: the kernel either refuses or reports the local address.
            Ok(dst) => assert_eq!(dst, addr),
            Err(e) => assert!(SUPPORTED || e.kind() == io::ErrorKind::Unsupported),
        }
    }
}
