//! Reduced document references carried inside events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The only keys a [`DocumentRef`] keeps from a full document record.
pub const DOCUMENT_KEYS: [&str; 3] = ["id", "title", "slug"];

/// Minimal, fixed-shape view of a bibliography document.
///
/// Values are kept exactly as the source record held them, so a numeric id
/// or a null title survives a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    id: Value,
    title: Value,
    slug: Value,
}

impl DocumentRef {
    pub fn new(id: impl Into<Value>, title: impl Into<Value>, slug: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            slug: slug.into(),
        }
    }

    /// Stable identifier assigned by the bibliography, when it is a string.
    pub fn id(&self) -> Option<&str> {
        self.id.as_str()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_str()
    }

    /// URL-safe identifier used for publication links.
    pub fn slug(&self) -> Option<&str> {
        self.slug.as_str()
    }

    /// The identifier as stored, whatever its JSON type.
    pub fn raw_id(&self) -> &Value {
        &self.id
    }

    /// The reference as a three-key record.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::with_capacity(DOCUMENT_KEYS.len());
        record.insert("id".into(), self.id.clone());
        record.insert("title".into(), self.title.clone());
        record.insert("slug".into(), self.slug.clone());
        record
    }
}

impl TryFrom<&Map<String, Value>> for DocumentRef {
    type Error = Error;

    fn try_from(document: &Map<String, Value>) -> Result<Self> {
        make_document_ref(document)
    }
}

/// Reduce a full document record to its `id`, `title` and `slug`.
///
/// Every other key is dropped. Fails with [`Error::MissingField`] naming the
/// first of the three keys that is absent; the values themselves are not
/// inspected.
pub fn make_document_ref(document: &Map<String, Value>) -> Result<DocumentRef> {
    Ok(DocumentRef {
        id: required_key(document, "id")?,
        title: required_key(document, "title")?,
        slug: required_key(document, "slug")?,
    })
}

fn required_key(document: &Map<String, Value>, key: &str) -> Result<Value> {
    document
        .get(key)
        .cloned()
        .ok_or_else(|| Error::MissingField(key.to_string()))
}
