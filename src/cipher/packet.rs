//! Encrypted datagram framing
//!
//! Every datagram is self-contained: `salt ‖ seal(payload)`, sealed under a
//! fresh subkey with an all-zero nonce.

use super::aead::{derive_subkey, ChunkCipher, TAG_LEN};
use super::CipherKind;
use rand::RngCore;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Largest datagram read off the wire
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Stateless per-datagram cipher
#[derive(Clone)]
pub struct PacketCipher {
    kind: CipherKind,
    key: Arc<[u8]>,
}

impl PacketCipher {
    pub(super) fn new(kind: CipherKind, key: Arc<[u8]>) -> Self {
        PacketCipher { kind, key }
    }

    /// Encrypt one datagram payload
    pub fn encrypt(&self, payload: &[u8]) -> io::Result<Vec<u8>> {
        if !self.kind.is_aead() {
            return Ok(payload.to_vec());
        }

        let mut salt = vec![0u8; self.kind.salt_len()];
        rand::thread_rng().fill_bytes(&mut salt);
        let subkey = derive_subkey(&self.key, &salt)?;
        let sealed = ChunkCipher::new(self.kind, &subkey)?.seal(payload)?;

        let mut packet = salt;
        packet.extend_from_slice(&sealed);
        Ok(packet)
    }

    /// Decrypt one datagram, failing on short or forged input
    pub fn decrypt(&self, packet: &[u8]) -> io::Result<Vec<u8>> {
        if !self.kind.is_aead() {
            return Ok(packet.to_vec());
        }

        let salt_len = self.kind.salt_len();
        if packet.len() < salt_len + TAG_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("encrypted packet too short: {} bytes", packet.len()),
            ));
        }

        let (salt, sealed) = packet.split_at(salt_len);
        let subkey = derive_subkey(&self.key, salt)?;
        ChunkCipher::new(self.kind, &subkey)?.open(sealed)
    }
}

/// A UDP socket whose datagrams are encrypted with a [`PacketCipher`]
pub struct ShadowSocket {
    socket: UdpSocket,
    cipher: PacketCipher,
}

impl ShadowSocket {
    pub(super) fn new(socket: UdpSocket, cipher: PacketCipher) -> Self {
        ShadowSocket { socket, cipher }
    }

    /// Encrypt and send one datagram
    pub async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        let packet = self.cipher.encrypt(payload)?;
        self.socket.send_to(&packet, target).await?;
        Ok(payload.len())
    }

    /// Receive and decrypt one datagram into `buf`.
    ///
    /// The plaintext is truncated if `buf` is too small.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut raw = vec![0u8; MAX_PACKET_SIZE];
        let (n, peer) = self.socket.recv_from(&mut raw).await?;
        let plain = self.cipher.decrypt(&raw[..n])?;

        let len = plain.len().min(buf.len());
        buf[..len].copy_from_slice(&plain[..len]);
        Ok((len, peer))
    }

    /// Local address of the underlying socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
