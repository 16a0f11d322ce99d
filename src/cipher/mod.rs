//! Cipher subsystem
//!
//! [`pick_cipher`] is the only factory the relay layer calls. The returned
//! [`Cipher`] wraps raw streams and datagram sockets; AEAD, HKDF and the
//! digests come from RustCrypto, only the framing lives here.

mod aead;
mod kind;
mod packet;
mod stream;

pub use kind::CipherKind;
pub use packet::{PacketCipher, ShadowSocket, MAX_PACKET_SIZE};
pub use stream::{ShadowStream, MAX_PAYLOAD};

use crate::error::SockshadeError;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::fmt;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// A keyed cipher able to wrap streams and datagram sockets
#[derive(Clone)]
pub struct Cipher {
    kind: CipherKind,
    key: Arc<[u8]>,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl Cipher {
    /// The selected cipher
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Wrap a byte stream
    pub fn stream_conn<S>(&self, inner: S) -> ShadowStream<S> {
        if self.kind.is_aead() {
            ShadowStream::aead(inner, self.kind, self.key.clone())
        } else {
            ShadowStream::plain(inner)
        }
    }

    /// Wrap a datagram socket
    pub fn packet_conn(&self, socket: UdpSocket) -> ShadowSocket {
        ShadowSocket::new(socket, self.packet_cipher())
    }

    /// The per-datagram cipher, for callers that manage their own socket
    pub fn packet_cipher(&self) -> PacketCipher {
        PacketCipher::new(self.kind, self.key.clone())
    }
}

/// Select a cipher by name and key it.
///
/// An explicit `key` must match the cipher's key size; otherwise the master key
/// is derived from `password`. AEAD ciphers need at least one of the two.
pub fn pick_cipher(name: &str, key: &[u8], password: &str) -> Result<Cipher, SockshadeError> {
    let kind = CipherKind::from_name(name).ok_or_else(|| {
        SockshadeError::Cipher(format!(
            "unknown cipher '{}' (available: {})",
            name,
            list_ciphers().join(" ")
        ))
    })?;

    if !kind.is_aead() {
        return Ok(Cipher {
            kind,
            key: Arc::from(Vec::new()),
        });
    }

    let key = if !key.is_empty() {
        if key.len() != kind.key_len() {
            return Err(SockshadeError::Cipher(format!(
                "{} requires a {}-byte key, got {}",
                kind,
                kind.key_len(),
                key.len()
            )));
        }
        key.to_vec()
    } else if !password.is_empty() {
        aead::evp_bytes_to_key(password.as_bytes(), kind.key_len())
    } else {
        return Err(SockshadeError::Cipher(format!(
            "{} requires a key or a password",
            kind
        )));
    };

    Ok(Cipher {
        kind,
        key: Arc::from(key),
    })
}

/// Canonical names of every supported cipher
pub fn list_ciphers() -> Vec<&'static str> {
    CipherKind::ALL.iter().map(|kind| kind.name()).collect()
}

/// Decode a base64url key as accepted by `--key`
pub fn decode_key(encoded: &str) -> Result<Vec<u8>, SockshadeError> {
    URL_SAFE
        .decode(encoded.trim())
        .map_err(|e| SockshadeError::Cipher(format!("invalid base64url key: {}", e)))
}

/// Generate a random base64url key of `len` bytes
pub fn generate_key(len: usize) -> String {
    use rand::RngCore;

    let mut key = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut key);
    URL_SAFE.encode(key)
}
