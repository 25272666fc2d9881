//! Key manager: the single vault key and its persisted slot.
//!
//! The exported key lives in `encryption_keys` under the id `mainKey`,
//! separate from the records it protects. Once written it is never replaced:
//! a new key would orphan every record encrypted under the old one.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};
use zeroize::Zeroizing;

use dv_crypto::{CryptoError, EncryptionKey};

use crate::error::StoreError;
use crate::models::format_timestamp;

pub const MAIN_KEY_ID: &str = "mainKey";

pub struct KeyManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> KeyManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Return the vault key, creating and persisting it on first use.
    ///
    /// The slot is written with `INSERT OR IGNORE` and then re-read, so two
    /// openers racing on an empty vault both end up with whichever key landed
    /// first.
    pub async fn ensure_key(&self) -> Result<EncryptionKey, StoreError> {
        if let Some(stored) = self.load().await? {
            debug!("vault key loaded from slot");
            return import(&stored);
        }

        let fresh = EncryptionKey::generate();
        let exported = Zeroizing::new(fresh.export());

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO encryption_keys (id, key, created_at) VALUES (?, ?, ?)",
        )
        .bind(MAIN_KEY_ID)
        .bind(exported.as_str())
        .bind(format_timestamp(&Utc::now()))
        .execute(self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            info!("generated new vault key");
        }

        let stored = self
            .load()
            .await?
            .ok_or_else(|| StoreError::KeyExport("generated key was not persisted".into()))?;
        import(&stored)
    }

    async fn load(&self) -> Result<Option<Zeroizing<String>>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT key FROM encryption_keys WHERE id = ?")
            .bind(MAIN_KEY_ID)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(|(key,)| Zeroizing::new(key)))
    }
}

fn import(stored: &str) -> Result<EncryptionKey, StoreError> {
    EncryptionKey::import(stored).map_err(|e| match e {
        CryptoError::KeyImport(reason) => StoreError::KeyImport(reason),
        other => StoreError::KeyImport(other.to_string()),
    })
}
