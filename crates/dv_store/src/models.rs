//! Record types and their SQL row form.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One item collected from an external source.
///
/// `payload` is opaque to the store; only the cipher and the exporter look
/// inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub extracted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Record {
    /// Build a record stamped with the current time (millisecond precision,
    /// matching what the store persists).
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        source: impl Into<String>,
        record_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name,
            source: source.into(),
            record_type: record_type.into(),
            extracted_at: Utc::now().trunc_subsecs(3),
            payload,
        }
    }
}

/// Row as persisted in `extracted_data`. The payload lives in `iv` + `ciphertext`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EncryptedRow {
    pub id: String,
    pub name: Option<String>,
    pub source: String,
    pub record_type: String,
    pub extracted_at: String,
    pub iv: String,
    pub ciphertext: String,
}

/// Metadata filter served by the secondary indexes.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub record_type: Option<String>,
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn by_type(record_type: impl Into<String>) -> Self {
        Self {
            record_type: Some(record_type.into()),
            ..Self::default()
        }
    }

    pub fn by_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }
}

/// Result of a bulk read: everything that decrypted, plus the ids that did not.
#[derive(Debug, Clone, Default)]
pub struct BulkRead {
    pub records: Vec<Record>,
    pub skipped: Vec<String>,
}

/// ISO-8601 with millisecond precision and a `Z` suffix. Lexicographic order
/// of these strings is chronological order, which the index relies on.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptMetadata {
            id: id.to_string(),
            reason: format!("extracted_at: {e}"),
        })
}
