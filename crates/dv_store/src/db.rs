//! Record store over SQLite via sqlx.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    QueryBuilder, Sqlite, SqlitePool,
};
use tracing::{debug, info, warn};

use dv_crypto::{CryptoError, EncryptionKey, Envelope};

use crate::error::StoreError;
use crate::keys::KeyManager;
use crate::models::{format_timestamp, parse_timestamp, BulkRead, EncryptedRow, Record, RecordFilter};

const SELECT_ROW: &str =
    "SELECT id, name, source, record_type, extracted_at, iv, ciphertext FROM extracted_data";

/// Central store handle.  Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
    key: Arc<EncryptionKey>,
}

impl Store {
    /// Open (or create) the vault database at `db_path`, run pending
    /// migrations and load the vault key, generating it on first use.
    ///
    /// Calling this again for the same path is harmless: every handle ends up
    /// with the same key. WAL mode is set on the connection, not inside a
    /// migration, because SQLite refuses to change `journal_mode` inside the
    /// transaction sqlx wraps each migration in.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        let key = KeyManager::new(&pool).ensure_key().await?;
        info!(path = %db_path.display(), "vault store opened");

        Ok(Self {
            pool,
            key: Arc::new(key),
        })
    }

    /// Release the connection pool. Other clones become unusable.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Encrypt the payload and upsert the record by id.
    pub async fn put(&self, record: &Record) -> Result<(), StoreError> {
        let envelope = dv_crypto::encrypt(&self.key, &record.payload, &record_aad(&record.id))?;

        sqlx::query(
            "INSERT INTO extracted_data (id, name, source, record_type, extracted_at, iv, ciphertext) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                name = excluded.name, \
                source = excluded.source, \
                record_type = excluded.record_type, \
                extracted_at = excluded.extracted_at, \
                iv = excluded.iv, \
                ciphertext = excluded.ciphertext",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.source)
        .bind(&record.record_type)
        .bind(format_timestamp(&record.extracted_at))
        .bind(envelope.encoded_iv())
        .bind(envelope.encoded_ciphertext())
        .execute(&self.pool)
        .await?;

        debug!(id = %record.id, record_type = %record.record_type, "record stored");
        Ok(())
    }

    /// Fetch and decrypt one record. A record that exists but cannot be
    /// decrypted is an error, not `None`.
    pub async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let row: Option<EncryptedRow> = sqlx::query_as(&format!("{SELECT_ROW} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| self.open_row(r)).transpose()
    }

    /// Every record that decrypts. Undecryptable rows are logged and skipped.
    pub async fn get_all(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.get_all_with_report().await?.records)
    }

    /// Like [`Store::get_all`], but also reports which ids were skipped.
    pub async fn get_all_with_report(&self) -> Result<BulkRead, StoreError> {
        self.query(&RecordFilter::default()).await
    }

    /// Bulk read narrowed by metadata. Only matching rows are decrypted.
    pub async fn query(&self, filter: &RecordFilter) -> Result<BulkRead, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_ROW);
        qb.push(" WHERE 1 = 1");
        if let Some(record_type) = &filter.record_type {
            qb.push(" AND record_type = ").push_bind(record_type.clone());
        }
        if let Some(source) = &filter.source {
            qb.push(" AND source = ").push_bind(source.clone());
        }
        if let Some(since) = &filter.since {
            qb.push(" AND extracted_at >= ").push_bind(format_timestamp(since));
        }
        if let Some(until) = &filter.until {
            qb.push(" AND extracted_at <= ").push_bind(format_timestamp(until));
        }
        qb.push(" ORDER BY extracted_at ASC, id ASC");

        let rows: Vec<EncryptedRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut out = BulkRead::default();
        for row in rows {
            let id = row.id.clone();
            match self.open_row(row) {
                Ok(record) => out.records.push(record),
                Err(e) if e.is_per_record() => {
                    warn!(id = %id, error = %e, "skipping unreadable record");
                    out.skipped.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        if !out.skipped.is_empty() {
            warn!(
                skipped = out.skipped.len(),
                returned = out.records.len(),
                "bulk read returned partial results"
            );
        }
        Ok(out)
    }

    /// Remove one record. Missing ids are not an error.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM extracted_data WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every record. The key slot is untouched. Returns rows removed.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        let removed = sqlx::query("DELETE FROM extracted_data")
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!(removed, "vault records cleared");
        Ok(removed)
    }

    /// Record counts per type, read from plaintext metadata only.
    pub async fn count_by_type(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT record_type, COUNT(*) FROM extracted_data GROUP BY record_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(t, n)| (t, u64::try_from(n).unwrap_or(0)))
            .collect())
    }

    fn open_row(&self, row: EncryptedRow) -> Result<Record, StoreError> {
        let extracted_at = parse_timestamp(&row.id, &row.extracted_at)?;
        let envelope = Envelope::from_encoded(&row.iv, &row.ciphertext)
            .map_err(|e| decryption_error(&row.id, e))?;
        let payload = dv_crypto::decrypt(&self.key, &envelope, &record_aad(&row.id))
            .map_err(|e| decryption_error(&row.id, e))?;

        Ok(Record {
            id: row.id,
            name: row.name,
            source: row.source,
            record_type: row.record_type,
            extracted_at,
            payload,
        })
    }
}

/// Binds each envelope to its record id, so ciphertext copied onto another
/// row fails authentication.
fn record_aad(id: &str) -> Vec<u8> {
    format!("dv-record-v1:{id}").into_bytes()
}

fn decryption_error(id: &str, err: CryptoError) -> StoreError {
    debug!(id = %id, error = %err, "record decryption failed");
    StoreError::Decryption { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::Store;
    use crate::models::Record;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reopen_keeps_the_same_key() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("vault.db");

        let first = Store::open(&path).await.expect("open store");
        let record = Record::new("a1", Some("John Doe".into()), "Facebook", "friend", json!({"mutual": 5}));
        first.put(&record).await.expect("put");
        first.close().await;

        let second = Store::open(&path).await.expect("reopen store");
        let back = second.get("a1").await.expect("get").expect("present");
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn migrations_create_expected_indexes() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("vault.db")).await.expect("open store");

        let names: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'extracted_data' AND name LIKE 'idx_%' ORDER BY name",
        )
        .fetch_all(&store.pool)
        .await
        .expect("list indexes");

        let names: Vec<String> = names.into_iter().map(|(n,)| n).collect();
        assert_eq!(
            names,
            vec![
                "idx_extracted_data_extracted_at",
                "idx_extracted_data_source",
                "idx_extracted_data_type"
            ]
        );
    }
}
