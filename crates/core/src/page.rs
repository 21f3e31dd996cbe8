//! Page content model.
//!
//! A [`PageData`] is produced by a content source and never mutated after
//! construction. Blocks carry their payload as an ordered list of named
//! [`FieldValue`]s read generically from the block's collection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical cache and lookup key for a route path.
///
/// The site root has its own variant so that `""` and `"/"` share one entry
/// and the content source can tell "the root page" apart from an empty uri.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageKey {
    Root,
    Path(String),
}

impl PageKey {
    /// Map an inbound request path to its key.
    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim();
        match trimmed {
            "" | "/" => PageKey::Root,
            p if p.starts_with('/') => PageKey::Path(p.to_string()),
            p => PageKey::Path(format!("/{p}")),
        }
    }

    /// Route path this key stands for.
    pub fn as_path(&self) -> &str {
        match self {
            PageKey::Root => "/",
            PageKey::Path(p) => p,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, PageKey::Root)
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

/// A published page and its ordered blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    pub id: i64,
    pub uri: Option<String>,
    pub status: String,
    pub title: String,
    pub blocks: Vec<Block>,
}

/// One content block: the collection it was read from plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub collection: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl Block {
    pub fn new(collection: impl Into<String>) -> Self {
        Self { collection: collection.into(), fields: Vec::new() }
    }

    /// Look up a payload field by column name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(key, _)| key == name).map(|(_, value)| value)
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }
}

/// A single payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Json(serde_json::Value),
}

impl FieldValue {
    /// Decode a raw byte payload: embedded JSON when it parses, text otherwise.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) => FieldValue::Json(value),
            Err(_) => FieldValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FieldValue::Json(v) => Some(v),
            _ => None,
        }
    }
}
