//! Relay module for Sockshade
//!
//! The pieces every proxy mode is assembled from:
//!
//! - [`watcher`]: force-closes streams when the shutdown token fires
//! - [`engine`]: bidirectional copy with forced expiry
//! - [`listener`]: cancellable accept loop dispatching to a [`ConnectionHandler`]
//! - [`resolver`]: how a client-side mode finds the destination
//! - [`tcp`] / [`udp`]: the handlers and UDP relays themselves

pub mod engine;
pub mod listener;
pub mod resolver;
pub mod tcp;
pub mod udp;
pub mod watcher;

pub use engine::{relay, RelayResult};
pub use listener::{serve, Acceptor, ConnectionHandler};
pub use resolver::{FixedTarget, RedirectDerived, Resolved, Resolver, SocksHandshake};
pub use tcp::{hold_udp_associate, TcpLocal, TcpRemote};
pub use udp::{UdpFraming, UdpLocal, UdpRemote};
pub use watcher::{watch, Watched};
