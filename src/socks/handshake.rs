//! SOCKS5 server handshake
//!
//! Runs method negotiation and reads the client request off an accepted
//! connection. Only "no authentication" is offered. CONNECT is answered
//! immediately (the real dial happens on the far side of the tunnel), UDP
//! ASSOCIATE is answered with the listener's own address when UDP is enabled.

use super::addr::Addr;
use super::consts::*;
use super::reply::build_reply;
use crate::error::Socks5Error;
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Outcome of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Relay a TCP stream to this destination
    Connect(Addr),
    /// Hold the control connection for a UDP session; the address is the
    /// client's announced UDP source and is informational only
    UdpAssociate(Addr),
}

/// Perform the SOCKS5 handshake on a freshly accepted stream
///
/// # Protocol Flow
///
/// 1. `VER NMETHODS METHODS` → `VER 0x00`
/// 2. `VER CMD RSV ATYP DST.ADDR DST.PORT` → reply
///
/// # Arguments
///
/// * `stream` - The accepted client stream
/// * `udp_enabled` - Whether UDP ASSOCIATE is accepted
/// * `bind_addr` - Address reported to the client for UDP ASSOCIATE
pub async fn handshake<S>(stream: &mut S, udp_enabled: bool, bind_addr: SocketAddr) -> Result<Request>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Step 1: method negotiation
    let mut header = [0u8; 2];
    stream
        .read_exact(&mut header)
        .await
        .context("Failed to read method negotiation")?;

    if header[0] != SOCKS5_VERSION {
        bail!(Socks5Error::UnsupportedVersion(header[0]));
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream
        .read_exact(&mut methods)
        .await
        .context("Failed to read authentication methods")?;

    if !methods.contains(&SOCKS5_AUTH_METHOD_NONE) {
        stream
            .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE])
            .await?;
        bail!(Socks5Error::NoAcceptableMethod);
    }
    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
        .await?;
    stream.flush().await?;

    // Step 2: request
    let mut request = [0u8; 3];
    stream
        .read_exact(&mut request)
        .await
        .context("Failed to read command header")?;

    if request[0] != SOCKS5_VERSION {
        bail!(Socks5Error::UnsupportedVersion(request[0]));
    }
    let command = request[1];

    let addr = match Addr::read_from(stream).await {
        Ok(addr) => addr,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            let _ = build_reply(stream, SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED, None).await;
            return Err(anyhow::Error::new(e).context("Failed to read destination address"));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to read destination address")),
    };

    match command {
        SOCKS5_CMD_TCP_CONNECT => {
            build_reply(stream, SOCKS5_REPLY_SUCCEEDED, None).await?;
            Ok(Request::Connect(addr))
        }
        SOCKS5_CMD_UDP_ASSOCIATE if udp_enabled => {
            build_reply(stream, SOCKS5_REPLY_SUCCEEDED, Some(bind_addr)).await?;
            Ok(Request::UdpAssociate(addr))
        }
        other => {
            build_reply(stream, SOCKS5_REPLY_COMMAND_NOT_SUPPORTED, None).await?;
            bail!(Socks5Error::CommandNotSupported(other))
        }
    }
}
