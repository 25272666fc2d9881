use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::export::ExportFormat;
use crate::models::format_timestamp;

const SETTINGS_KEY: &str = "vault.settings";

pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 60_000;
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
pub const MIN_FETCH_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub extraction_interval_ms: u64,
    pub retry_attempts: u32,
    pub fetch_timeout_ms: u64,
    pub default_export_format: ExportFormat,
    pub export_dir: Option<PathBuf>,
    pub source_name: String,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            extraction_interval_ms: 500,
            retry_attempts: 0,
            fetch_timeout_ms: 10_000,
            default_export_format: ExportFormat::Json,
            export_dir: None,
            source_name: "Facebook".into(),
        }
    }
}

impl VaultSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&self.extraction_interval_ms) {
            bail!(
                "extraction_interval_ms must be between {MIN_INTERVAL_MS} and {MAX_INTERVAL_MS}, got {}",
                self.extraction_interval_ms
            );
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            bail!("retry_attempts must be at most {MAX_RETRY_ATTEMPTS}");
        }
        if self.fetch_timeout_ms < MIN_FETCH_TIMEOUT_MS {
            bail!("fetch_timeout_ms must be at least {MIN_FETCH_TIMEOUT_MS}");
        }
        if self.source_name.trim().is_empty() {
            bail!("source_name must not be empty");
        }
        Ok(())
    }

    pub fn extraction_interval(&self) -> Duration {
        Duration::from_millis(self.extraction_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Update one field from its textual form, as typed on the command line.
    /// The result is not validated; call [`VaultSettings::validate`] before saving.
    pub fn set_field(&mut self, field: &str, value: &str) -> anyhow::Result<()> {
        match field {
            "extraction_interval_ms" => self.extraction_interval_ms = value.parse()?,
            "retry_attempts" => self.retry_attempts = value.parse()?,
            "fetch_timeout_ms" => self.fetch_timeout_ms = value.parse()?,
            "default_export_format" => {
                self.default_export_format = value.parse().map_err(|e| anyhow!("{e}"))?
            }
            "export_dir" => {
                self.export_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            "source_name" => self.source_name = value.to_string(),
            other => bail!("unknown setting: {other}"),
        }
        Ok(())
    }
}

pub async fn load_settings(store: &Store) -> anyhow::Result<VaultSettings> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(SETTINGS_KEY)
        .fetch_optional(&store.pool)
        .await?;
    match row {
        Some((raw,)) => Ok(serde_json::from_str(&raw)?),
        None => Ok(VaultSettings::default()),
    }
}

pub async fn save_settings(store: &Store, settings: &VaultSettings) -> anyhow::Result<()> {
    settings.validate()?;
    let data = serde_json::to_string(settings)?;
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(SETTINGS_KEY)
    .bind(data)
    .bind(format_timestamp(&Utc::now()))
    .execute(&store.pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        VaultSettings::default().validate().unwrap();
    }

    #[test]
    fn interval_bounds_enforced() {
        let mut s = VaultSettings::default();
        s.extraction_interval_ms = 50;
        assert!(s.validate().is_err());
        s.extraction_interval_ms = 60_001;
        assert!(s.validate().is_err());
        s.extraction_interval_ms = 100;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn set_field_parses_values() {
        let mut s = VaultSettings::default();
        s.set_field("retry_attempts", "3").unwrap();
        s.set_field("default_export_format", "csv").unwrap();
        s.set_field("export_dir", "/tmp/out").unwrap();
        assert_eq!(s.retry_attempts, 3);
        assert_eq!(s.default_export_format, ExportFormat::Csv);
        assert_eq!(s.export_dir, Some(PathBuf::from("/tmp/out")));
        assert!(s.set_field("retry_attempts", "many").is_err());
        assert!(s.set_field("colour", "blue").is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let s: VaultSettings = serde_json::from_str(r#"{"retry_attempts":2}"#).unwrap();
        assert_eq!(s.retry_attempts, 2);
        assert_eq!(s.extraction_interval_ms, 500);
        assert_eq!(s.source_name, "Facebook");
    }

    #[tokio::test]
    async fn settings_persist_in_vault() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("vault.db")).await.unwrap();

        assert_eq!(load_settings(&store).await.unwrap(), VaultSettings::default());

        let mut s = VaultSettings::default();
        s.extraction_interval_ms = 1500;
        save_settings(&store, &s).await.unwrap();
        assert_eq!(load_settings(&store).await.unwrap().extraction_interval_ms, 1500);

        s.extraction_interval_ms = 10;
        assert!(save_settings(&store, &s).await.is_err());
        assert_eq!(load_settings(&store).await.unwrap().extraction_interval_ms, 1500);
    }
}
