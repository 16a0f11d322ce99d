//! SOCKS5 UDP request framing
//!
//! # UDP Request/Response Format
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```
//!
//! Everything from ATYP on is exactly the tunnel's own `addr ‖ data` payload,
//! so converting between the two only adds or strips the 3-byte prefix.

use anyhow::{bail, Result};

/// Length of the RSV + FRAG prefix
pub const UDP_HEADER_PREFIX_LEN: usize = 3;

/// Strip the SOCKS5 UDP prefix, returning the `addr ‖ data` tunnel payload.
///
/// Fragmented datagrams are rejected.
pub fn strip_udp_header(datagram: &[u8]) -> Result<&[u8]> {
    if datagram.len() <= UDP_HEADER_PREFIX_LEN {
        bail!("UDP packet too short: {} bytes", datagram.len());
    }

    let rsv = u16::from_be_bytes([datagram[0], datagram[1]]);
    if rsv != 0 {
        bail!("Invalid RSV field: {}", rsv);
    }

    let frag = datagram[2];
    if frag != 0 {
        bail!("Fragmented UDP packets not supported (frag={})", frag);
    }

    Ok(&datagram[UDP_HEADER_PREFIX_LEN..])
}

/// Prefix an `addr ‖ data` tunnel payload with the SOCKS5 UDP header
pub fn add_udp_header(payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(UDP_HEADER_PREFIX_LEN + payload.len());
    datagram.extend_from_slice(&[0, 0, 0]);
    datagram.extend_from_slice(payload);
    datagram
}
