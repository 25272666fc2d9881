//! Source collaborator seam.
//!
//! A source exposes an ordered list of items for one data type. The engine
//! asks for the length once per job and then fetches one index at a time.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use dv_store::Record;

use crate::error::SourceError;

#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    async fn len(&self) -> Result<usize, SourceError>;

    async fn fetch(&self, index: usize) -> Result<Value, SourceError>;
}

/// What an engine needs to know to turn raw items into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Origin recorded on every record, e.g. `Facebook`.
    pub source: String,
    /// Singular record type, e.g. `friend`.
    pub record_type: String,
    /// Human label used in status messages, e.g. `friends`.
    pub label: String,
    pub id_field: String,
    pub name_field: Option<String>,
}

impl SourceDescriptor {
    /// Build the record for one fetched item. The whole item becomes the payload.
    pub fn to_record(&self, item: Value) -> Result<Record, SourceError> {
        let id = match item.get(&self.id_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SourceError::Malformed(format!(
                    "missing `{}` on {} item",
                    self.id_field, self.record_type
                )))
            }
        };
        let name = self
            .name_field
            .as_deref()
            .and_then(|field| item.get(field))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Record::new(id, name, &self.source, &self.record_type, item))
    }
}

/// The data types the vault knows how to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    Friend,
    Message,
    Post,
    Group,
}

impl DataKind {
    pub const ALL: [DataKind; 4] = [Self::Friend, Self::Message, Self::Post, Self::Group];

    pub fn record_type(self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Message => "message",
            Self::Post => "post",
            Self::Group => "group",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            Self::Friend => "friends",
            Self::Message => "messages",
            Self::Post => "posts",
            Self::Group => "groups",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Message => "message threads",
            other => other.plural(),
        }
    }

    pub fn descriptor(self, source: &str) -> SourceDescriptor {
        SourceDescriptor {
            source: source.to_string(),
            record_type: self.record_type().to_string(),
            label: self.label().to_string(),
            id_field: "id".to_string(),
            // Posts carry an author, not a name.
            name_field: match self {
                Self::Post => None,
                _ => Some("name".to_string()),
            },
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| s == k.record_type() || s == k.plural())
            .ok_or_else(|| format!("unknown data kind `{s}` (expected friends, messages, posts or groups)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_parses_singular_and_plural() {
        assert_eq!("friends".parse::<DataKind>().unwrap(), DataKind::Friend);
        assert_eq!("Message".parse::<DataKind>().unwrap(), DataKind::Message);
        assert!("photos".parse::<DataKind>().is_err());
    }

    #[test]
    fn descriptor_builds_records() {
        let d = DataKind::Friend.descriptor("Facebook");
        let r = d
            .to_record(json!({"id": "12345678", "name": "John Doe", "mutual": 5}))
            .unwrap();
        assert_eq!(r.id, "12345678");
        assert_eq!(r.name.as_deref(), Some("John Doe"));
        assert_eq!(r.record_type, "friend");
        assert_eq!(r.source, "Facebook");
        assert_eq!(r.payload["mutual"], 5);
    }

    #[test]
    fn posts_have_no_name() {
        let d = DataKind::Post.descriptor("Facebook");
        let r = d.to_record(json!({"id": "post_1", "author": "1"})).unwrap();
        assert!(r.name.is_none());
    }

    #[test]
    fn missing_id_is_malformed() {
        let d = DataKind::Group.descriptor("Facebook");
        assert!(matches!(
            d.to_record(json!({"name": "Tech"})),
            Err(SourceError::Malformed(_))
        ));
    }
}
