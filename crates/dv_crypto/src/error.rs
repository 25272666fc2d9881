use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key import failed: {0}")]
    KeyImport(String),

    #[error("AEAD encryption failed")]
    Encryption,

    #[error("Decryption failed (authentication tag mismatch or malformed envelope)")]
    Decryption,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
