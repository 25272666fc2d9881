use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Key import failed: {0}")]
    KeyImport(String),

    #[error("Key export failed: {0}")]
    KeyExport(String),

    #[error("Failed to decrypt record {id}")]
    Decryption { id: String },

    #[error("Corrupt metadata for record {id}: {reason}")]
    CorruptMetadata { id: String, reason: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] dv_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors scoped to a single stored row. Bulk reads skip these instead
    /// of failing the whole read.
    pub fn is_per_record(&self) -> bool {
        matches!(self, Self::Decryption { .. } | Self::CorruptMetadata { .. })
    }
}
