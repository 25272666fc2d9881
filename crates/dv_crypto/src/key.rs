//! Vault encryption key.
//!
//! One 256-bit AES-GCM key protects every record in the vault. It is
//! generated once, exported to a base64 string for persistence, and imported
//! back on every subsequent start.

use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Key size in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// 32-byte vault key. Zeroized on drop, never `Debug`-printed.
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Generate a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Export the raw key as standard base64 for storage.
    pub fn export(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    /// Import a key previously produced by [`EncryptionKey::export`].
    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| CryptoError::KeyImport(format!("decode: {e}")))?,
        );
        if decoded.len() != KEY_LEN {
            return Err(CryptoError::KeyImport(format!(
                "expected {KEY_LEN} bytes, got {}",
                decoded.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_import_roundtrip() {
        let key = EncryptionKey::generate();
        let exported = key.export();
        let imported = EncryptionKey::import(&exported).unwrap();
        assert_eq!(key.as_bytes(), imported.as_bytes());
    }

    #[test]
    fn generated_keys_differ() {
        let a = EncryptionKey::generate();
        let b = EncryptionKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn import_rejects_corrupted_material() {
        assert!(matches!(
            EncryptionKey::import("not base64 at all!"),
            Err(CryptoError::KeyImport(_))
        ));
        // Valid base64, wrong length.
        let short = general_purpose::STANDARD.encode([7u8; 16]);
        assert!(matches!(
            EncryptionKey::import(&short),
            Err(CryptoError::KeyImport(_))
        ));
    }

    #[test]
    fn debug_does_not_leak_material() {
        let key = EncryptionKey::from_bytes([0xAB; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "EncryptionKey(..)");
    }
}
