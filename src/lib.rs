//! # Sockshade - Encrypted TCP/UDP Relay
//!
//! Sockshade relays TCP and UDP traffic between a local agent and a remote
//! egress point over shadowsocks-style AEAD framing. The client side accepts
//! traffic through a SOCKS5 front-end, static tunnels or transparent redirect;
//! the server side decrypts it and forwards it to the real destination.
//!
//! ## Features
//!
//! - **One relay primitive**: every mode shares the same accept loop, resolver
//!   seam and bidirectional relay
//! - **Prompt shutdown**: one cancellation token unblocks every accept, dial,
//!   handshake and copy; shutdown waits for every task it started
//! - **UDP**: static UDP tunnels, SOCKS5 UDP ASSOCIATE and a UDP server side
//!   with idle-expiring NAT entries
//! - **Ciphers**: AEAD_CHACHA20_POLY1305, AEAD_AES_128_GCM, AEAD_AES_256_GCM
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockshade::config::load_config;
//! use sockshade::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let orchestrator = Orchestrator::start(&config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! App -> [SOCKS | tunnel | redirect] -> client --AEAD--> server -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cipher;
pub mod config;
pub mod error;
pub mod helper;
pub mod orchestrator;
pub mod redir;
pub mod relay;
pub mod socks;

// Re-export commonly used items
pub use cipher::{pick_cipher, Cipher};
pub use config::{load_config, Config};
pub use error::{Socks5Error, SockshadeError};
pub use orchestrator::Orchestrator;

/// Version of the Sockshade library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
