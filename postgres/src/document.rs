//! Schemaless JSON records for the `roster-sync` tool.

use roster_engine::{Entity, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identity of a [`Document`], keeping the JSON type of its key field.
///
/// `42` and `"42"` are different keys. Integers order numerically and sort
/// before strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentKey {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Default for DocumentKey {
    fn default() -> Self {
        DocumentKey::Text(String::new())
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKey::Bool(b) => write!(f, "{}", b),
            DocumentKey::Int(n) => write!(f, "{}", n),
            DocumentKey::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for DocumentKey {
    fn from(s: &str) -> Self {
        DocumentKey::Text(s.to_string())
    }
}

impl From<i64> for DocumentKey {
    fn from(n: i64) -> Self {
        DocumentKey::Int(n)
    }
}

/// A JSON object identified by one of its own fields.
///
/// The key field must hold a string, an integer that fits `i64`, or a
/// boolean. Only the fields are serialized; the identity is restored from
/// the store's id column on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(skip)]
    id: DocumentKey,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Document {
    /// Wrap a JSON object, taking its identity from `key_field`.
    pub fn keyed(value: Value, key_field: &str) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(Error::invalid_argument("document is not a JSON object"));
        };
        let id = match fields.get(key_field) {
            Some(Value::String(s)) => DocumentKey::Text(s.clone()),
            Some(Value::Bool(b)) => DocumentKey::Bool(*b),
            Some(value) => value.as_i64().map(DocumentKey::Int).ok_or_else(|| {
                Error::invalid_argument(format!(
                    "key field '{}' must be a string, 64-bit integer or boolean",
                    key_field
                ))
            })?,
            None => {
                return Err(Error::invalid_argument(format!(
                    "document has no '{}' field",
                    key_field
                )))
            }
        };
        Ok(Self { id, fields })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Entity for Document {
    type Id = DocumentKey;

    fn id(&self) -> DocumentKey {
        self.id.clone()
    }

    fn set_id(&mut self, id: DocumentKey) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }
}

/// Parse a JSON array of objects keyed by `key_field`.
pub fn load_documents(json: &str, key_field: &str) -> Result<Vec<Document>> {
    let values: Vec<Value> = serde_json::from_str(json)
        .map_err(|e| Error::invalid_argument(format!("input is not a JSON array: {}", e)))?;
    values
        .into_iter()
        .map(|value| Document::keyed(value, key_field))
        .collect()
}
