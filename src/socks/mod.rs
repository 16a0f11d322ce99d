//! SOCKS5 module for Sockshade
//!
//! Address and handshake subsystem: the wire address encoding shared by the
//! SOCKS front-end and the encrypted channel, the server-side SOCKS5
//! handshake, and the SOCKS5 UDP request framing.

mod addr;
mod consts;
mod handshake;
mod reply;
mod udp;

pub use addr::Addr;
pub use consts::*;
pub use handshake::{handshake, Request};
pub use reply::{build_reply, reply_bytes};
pub use udp::{add_udp_header, strip_udp_header, UDP_HEADER_PREFIX_LEN};
