//! AEAD primitives used by the stream and packet framings
//!
//! Key schedule:
//! - master key = explicit key, or EVP_BytesToKey(MD5) of the password
//! - per-salt subkey = HKDF-SHA1(salt, master key, "ss-subkey")
//! - nonce = 12-byte little-endian counter, bumped after every seal/open

use super::CipherKind;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;
use std::io;

/// Authentication tag length shared by every supported AEAD
pub const TAG_LEN: usize = 16;

/// Nonce length shared by every supported AEAD
pub const NONCE_LEN: usize = 12;

const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// Derive a master key from a password (OpenSSL EVP_BytesToKey with MD5)
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_len);
    key
}

/// Derive the session subkey for one salt
pub fn derive_subkey(master_key: &[u8], salt: &[u8]) -> io::Result<Vec<u8>> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master_key);
    let mut subkey = vec![0u8; master_key.len()];
    hk.expand(SUBKEY_INFO, &mut subkey)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("HKDF expand failed: {}", e)))?;
    Ok(subkey)
}

#[allow(clippy::large_enum_variant)]
enum AeadInner {
    Aes128Gcm(Aes128Gcm),
    Aes256Gcm(Aes256Gcm),
    ChaCha20Poly1305(ChaCha20Poly1305),
}

/// One direction of an AEAD session: a keyed cipher plus its nonce counter
pub struct ChunkCipher {
    inner: AeadInner,
    nonce: [u8; NONCE_LEN],
}

impl ChunkCipher {
    /// Key a new cipher with a session subkey
    pub fn new(kind: CipherKind, subkey: &[u8]) -> io::Result<Self> {
        let bad_key = |_| io::Error::new(io::ErrorKind::InvalidInput, "invalid AEAD key length");

        let inner = match kind {
            CipherKind::Aes128Gcm => AeadInner::Aes128Gcm(Aes128Gcm::new_from_slice(subkey).map_err(bad_key)?),
            CipherKind::Aes256Gcm => AeadInner::Aes256Gcm(Aes256Gcm::new_from_slice(subkey).map_err(bad_key)?),
            CipherKind::ChaCha20Poly1305 => {
                AeadInner::ChaCha20Poly1305(ChaCha20Poly1305::new_from_slice(subkey).map_err(bad_key)?)
            }
            CipherKind::Dummy => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "dummy cipher has no AEAD session",
                ))
            }
        };

        Ok(ChunkCipher {
            inner,
            nonce: [0u8; NONCE_LEN],
        })
    }

    /// Encrypt and authenticate, appending the tag
    pub fn seal(&mut self, plaintext: &[u8]) -> io::Result<Vec<u8>> {
        let nonce = GenericArray::from_slice(&self.nonce);
        let sealed = match &self.inner {
            AeadInner::Aes128Gcm(cipher) => cipher.encrypt(nonce, plaintext),
            AeadInner::Aes256Gcm(cipher) => cipher.encrypt(nonce, plaintext),
            AeadInner::ChaCha20Poly1305(cipher) => cipher.encrypt(nonce, plaintext),
        }
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "AEAD seal failed"))?;

        self.increment_nonce();
        Ok(sealed)
    }

    /// Verify and decrypt a sealed chunk
    pub fn open(&mut self, ciphertext: &[u8]) -> io::Result<Vec<u8>> {
        let nonce = GenericArray::from_slice(&self.nonce);
        let opened = match &self.inner {
            AeadInner::Aes128Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
            AeadInner::Aes256Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
            AeadInner::ChaCha20Poly1305(cipher) => cipher.decrypt(nonce, ciphertext),
        }
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "AEAD authentication failed"))?;

        self.increment_nonce();
        Ok(opened)
    }

    fn increment_nonce(&mut self) {
        for byte in self.nonce.iter_mut() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }
}
