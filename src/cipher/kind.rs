//! Supported cipher identifiers

use std::fmt;

/// Cipher identifiers accepted by [`pick_cipher`](super::pick_cipher)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// No encryption; traffic is passed through untouched
    Dummy,
    /// AES-128-GCM
    Aes128Gcm,
    /// AES-256-GCM
    Aes256Gcm,
    /// ChaCha20-Poly1305 (IETF variant)
    ChaCha20Poly1305,
}

impl CipherKind {
    /// Every supported cipher, in the order shown to users
    pub const ALL: [CipherKind; 4] = [
        CipherKind::ChaCha20Poly1305,
        CipherKind::Aes128Gcm,
        CipherKind::Aes256Gcm,
        CipherKind::Dummy,
    ];

    /// Look up a cipher by name (case-insensitive, common aliases accepted)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "DUMMY" => Some(CipherKind::Dummy),
            "AEAD_AES_128_GCM" | "AES-128-GCM" => Some(CipherKind::Aes128Gcm),
            "AEAD_AES_256_GCM" | "AES-256-GCM" => Some(CipherKind::Aes256Gcm),
            "AEAD_CHACHA20_POLY1305" | "CHACHA20-IETF-POLY1305" => {
                Some(CipherKind::ChaCha20Poly1305)
            }
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Dummy => "DUMMY",
            CipherKind::Aes128Gcm => "AEAD_AES_128_GCM",
            CipherKind::Aes256Gcm => "AEAD_AES_256_GCM",
            CipherKind::ChaCha20Poly1305 => "AEAD_CHACHA20_POLY1305",
        }
    }

    /// Master key length in bytes (0 for the dummy cipher)
    pub fn key_len(self) -> usize {
        match self {
            CipherKind::Dummy => 0,
            CipherKind::Aes128Gcm => 16,
            CipherKind::Aes256Gcm | CipherKind::ChaCha20Poly1305 => 32,
        }
    }

    /// Salt length in bytes; equal to the key length for every AEAD cipher
    pub fn salt_len(self) -> usize {
        self.key_len()
    }

    /// Whether this cipher actually encrypts
    pub fn is_aead(self) -> bool {
        self != CipherKind::Dummy
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_canonical() {
        for kind in CipherKind::ALL {
            assert_eq!(CipherKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_from_name_aliases_and_case() {
        assert_eq!(
            CipherKind::from_name("chacha20-ietf-poly1305"),
            Some(CipherKind::ChaCha20Poly1305)
        );
        assert_eq!(CipherKind::from_name("aes-128-gcm"), Some(CipherKind::Aes128Gcm));
        assert_eq!(CipherKind::from_name("Aead_Aes_256_Gcm"), Some(CipherKind::Aes256Gcm));
        assert_eq!(CipherKind::from_name("dummy"), Some(CipherKind::Dummy));
    }

    #[test]
    fn test_from_name_unknown() {
        assert_eq!(CipherKind::from_name("rc4-md5"), None);
        assert_eq!(CipherKind::from_name(""), None);
    }

    #[test]
    fn test_key_lengths() {
        assert_eq!(CipherKind::Aes128Gcm.key_len(), 16);
        assert_eq!(CipherKind::Aes256Gcm.key_len(), 32);
        assert_eq!(CipherKind::ChaCha20Poly1305.salt_len(), 32);
        assert_eq!(CipherKind::Dummy.key_len(), 0);
        assert!(!CipherKind::Dummy.is_aead());
    }
}
