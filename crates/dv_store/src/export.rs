//! Exporter: decrypted snapshots of the vault rendered as CSV, JSON or text.
//!
//! Exports are read-only with respect to the store. An empty selection yields
//! [`ExportOutcome::NoData`] and writes nothing.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::Store;
use crate::error::StoreError;
use crate::models::{format_timestamp, Record};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Unknown export scope: {0}")]
    UnknownScope(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Text,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Text => "txt",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
            Self::Text => "text/plain",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "text" | "txt" => Ok(Self::Text),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Text => "text",
        })
    }
}

/// Which records an export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    All,
    /// A singular record type, e.g. `friend`.
    Type(String),
}

impl ExportScope {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Type(t) => record.record_type == *t,
        }
    }
}

/// Accepts `all`, plural type names (`friends`) and singular ones (`friend`).
impl FromStr for ExportScope {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err(ExportError::UnknownScope(s));
        }
        if s == "all" {
            return Ok(Self::All);
        }
        let singular = s.strip_suffix('s').filter(|t| !t.is_empty()).unwrap_or(s.as_str());
        Ok(Self::Type(singular.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub scope: ExportScope,
    pub format: ExportFormat,
}

/// A rendered export, ready to be written or handed to a caller.
#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub file_name: String,
    pub mime_type: &'static str,
    pub contents: String,
    pub record_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written { path: PathBuf, records: usize },
    NoData,
}

pub struct Exporter {
    store: Store,
    out_dir: PathBuf,
    source_name: String,
}

impl Exporter {
    pub fn new(store: Store, out_dir: impl Into<PathBuf>, source_name: impl Into<String>) -> Self {
        Self {
            store,
            out_dir: out_dir.into(),
            source_name: source_name.into(),
        }
    }

    /// Render the selected records without touching the filesystem.
    pub async fn render(&self, options: &ExportOptions) -> Result<Option<ExportDocument>, ExportError> {
        let records: Vec<Record> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|r| options.scope.matches(r))
            .collect();

        if records.is_empty() {
            return Ok(None);
        }
        render_document(&records, options.format, &self.source_name).map(Some)
    }

    pub async fn export_data(&self, options: &ExportOptions) -> Result<ExportOutcome, ExportError> {
        let Some(doc) = self.render(options).await? else {
            warn!(scope = ?options.scope, "no data matching export criteria");
            return Ok(ExportOutcome::NoData);
        };

        tokio::fs::create_dir_all(&self.out_dir).await?;
        let path = self.out_dir.join(&doc.file_name);
        tokio::fs::write(&path, doc.contents.as_bytes()).await?;

        info!(path = %path.display(), records = doc.record_count, format = %options.format, "export written");
        Ok(ExportOutcome::Written {
            path,
            records: doc.record_count,
        })
    }
}

pub fn render_document(
    records: &[Record],
    format: ExportFormat,
    source_name: &str,
) -> Result<ExportDocument, ExportError> {
    let contents = match format {
        ExportFormat::Csv => to_csv(records),
        ExportFormat::Json => serde_json::to_string_pretty(records)?,
        ExportFormat::Text => to_text(records),
    };
    Ok(ExportDocument {
        file_name: format!("{}-data-export.{}", slug(source_name), format.extension()),
        mime_type: format.mime_type(),
        contents,
        record_count: records.len(),
    })
}

const BASE_COLUMNS: [&str; 5] = ["id", "name", "source", "type", "extractedAt"];

enum Column {
    Base(&'static str),
    PayloadField(String),
    Payload,
}

impl Column {
    fn header(&self) -> String {
        match self {
            Self::Base(name) => (*name).to_string(),
            Self::PayloadField(key) => format!("payload.{key}"),
            Self::Payload => "payload".to_string(),
        }
    }

    fn cell(&self, record: &Record) -> String {
        match self {
            Self::Base("id") => quote(&record.id),
            Self::Base("name") => record.name.as_deref().map(quote).unwrap_or_default(),
            Self::Base("source") => quote(&record.source),
            Self::Base("type") => quote(&record.record_type),
            Self::Base(_) => quote(&format_timestamp(&record.extracted_at)),
            Self::PayloadField(key) => match &record.payload {
                Value::Object(map) => map.get(key).map(csv_value).unwrap_or_default(),
                _ => String::new(),
            },
            Self::Payload => match &record.payload {
                Value::Object(_) => String::new(),
                other => csv_value(other),
            },
        }
    }
}

/// Header is the union of base fields and one level of payload keys, in
/// first-seen order. Non-object payloads get a single `payload` column.
fn to_csv(records: &[Record]) -> String {
    let mut columns: Vec<Column> = BASE_COLUMNS.into_iter().map(Column::Base).collect();
    let mut seen: Vec<&str> = Vec::new();
    let mut bare_payload = false;

    for record in records {
        match &record.payload {
            Value::Object(map) => {
                for key in map.keys() {
                    if !seen.contains(&key.as_str()) {
                        seen.push(key.as_str());
                        columns.push(Column::PayloadField(key.clone()));
                    }
                }
            }
            Value::Null => {}
            _ => bare_payload = true,
        }
    }
    if bare_payload {
        columns.push(Column::Payload);
    }

    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|c| header_cell(&c.header()))
            .collect::<Vec<_>>()
            .join(","),
    );
    for record in records {
        lines.push(
            columns
                .iter()
                .map(|c| c.cell(record))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => quote(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => quote(&value.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn header_cell(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        quote(s)
    } else {
        s.to_string()
    }
}

fn to_text(records: &[Record]) -> String {
    records
        .iter()
        .map(|r| match r.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{}: {}", r.id, name),
            _ => r.id.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn slug(source: &str) -> String {
    let slug: String = source
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "vault".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, name: Option<&str>, t: &str, payload: Value) -> Record {
        Record::new(id, name.map(String::from), "Facebook", t, payload)
    }

    #[test]
    fn scope_parsing() {
        assert_eq!("all".parse::<ExportScope>().unwrap(), ExportScope::All);
        assert_eq!("friends".parse::<ExportScope>().unwrap(), ExportScope::Type("friend".into()));
        assert_eq!("Post".parse::<ExportScope>().unwrap(), ExportScope::Type("post".into()));
        assert!("".parse::<ExportScope>().is_err());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("txt".parse::<ExportFormat>().unwrap(), ExportFormat::Text);
        assert!(matches!("xml".parse::<ExportFormat>(), Err(ExportError::UnknownFormat(_))));
    }

    #[test]
    fn csv_unions_payload_keys_and_escapes() {
        let records = vec![
            record("1", Some("Say \"hi\""), "friend", json!({"mutual": 5})),
            record("2", None, "post", json!({"text": "a,b", "meta": {"likes": 3}})),
        ];
        let csv = to_csv(&records);
        let mut lines = csv.lines();

        assert_eq!(
            lines.next().unwrap(),
            "id,name,source,type,extractedAt,payload.mutual,payload.meta,payload.text"
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("\"1\",\"Say \"\"hi\"\"\",\"Facebook\",\"friend\","));
        assert!(first.ends_with(",5,,"));
        let second = lines.next().unwrap();
        assert!(second.starts_with("\"2\",,"));
        assert!(second.ends_with(",,\"{\"\"likes\"\":3}\",\"a,b\""));
        assert!(lines.next().is_none());
    }

    #[test]
    fn csv_adds_payload_column_for_scalars() {
        let records = vec![record("1", None, "note", json!("plain"))];
        let csv = to_csv(&records);
        assert!(csv.starts_with("id,name,source,type,extractedAt,payload\n"));
        assert!(csv.ends_with(",\"plain\""));
    }

    #[test]
    fn text_lists_ids_and_names() {
        let records = vec![
            record("1", Some("John Doe"), "friend", json!({})),
            record("post_1", None, "post", json!({})),
            record("3", Some(""), "friend", json!({})),
        ];
        assert_eq!(to_text(&records), "1: John Doe\npost_1\n3");
    }

    #[test]
    fn json_is_pretty_array() {
        let records = vec![record("1", Some("John Doe"), "friend", json!({"mutual": 5}))];
        let doc = render_document(&records, ExportFormat::Json, "Facebook").unwrap();
        assert_eq!(doc.file_name, "facebook-data-export.json");
        assert!(doc.contents.starts_with("[\n  {"));
        let back: Vec<Record> = serde_json::from_str(&doc.contents).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn slug_normalises_source_name() {
        assert_eq!(slug("Facebook"), "facebook");
        assert_eq!(slug("My Source!"), "my-source");
        assert_eq!(slug("  "), "vault");
    }
}
