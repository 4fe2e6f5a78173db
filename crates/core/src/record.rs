//! Core record types for quiverdb.
//!
//! A [`Record`] is the unit of storage: an external string id, an embedding, and
//! optional document text and scalar metadata. [`MetadataValue`] holds the scalar
//! types that metadata predicates can compare against.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed metadata value attached to a record.
///
/// Uses the default externally-tagged serde representation for bincode compatibility.
/// [`MetadataValue::from_json`] converts from untagged JSON at the API boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Boolean value (`true` / `false`).
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
}

impl MetadataValue {
    /// Converts a scalar JSON value. Objects, arrays and null are rejected.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(MetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(MetadataValue::Int(i))
                } else {
                    n.as_f64().map(MetadataValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(MetadataValue::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

/// Scalar key/value metadata of a record.
pub type Metadata = HashMap<String, MetadataValue>;

/// Converts a JSON object into [`Metadata`], naming the first non-scalar key.
pub fn metadata_from_json(
    object: &serde_json::Map<String, serde_json::Value>,
) -> Result<Metadata, String> {
    object
        .iter()
        .map(|(k, v)| {
            MetadataValue::from_json(v)
                .map(|mv| (k.clone(), mv))
                .ok_or_else(|| format!("metadata key '{k}' must be a bool, number or string"))
        })
        .collect()
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// External id, unique within a collection.
    pub id: String,
    pub embedding: Vec<f32>,
    /// Optional document text, matched by document predicates.
    pub document: Option<String>,
    pub metadata: Option<Metadata>,
}

impl Record {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            document: None,
            metadata: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Looks up a metadata value by key.
    pub fn metadata_value(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

/// Fields written by a partial update. `None` leaves the stored field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    pub embedding: Option<Vec<f32>>,
    pub document: Option<String>,
    /// Merged key by key into the stored metadata.
    pub metadata: Option<Metadata>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.embedding.is_none() && self.document.is_none() && self.metadata.is_none()
    }

    /// Applies the patch to a stored record.
    pub fn apply_to(&self, record: &mut Record) {
        if let Some(ref embedding) = self.embedding {
            record.embedding = embedding.clone();
        }
        if let Some(ref document) = self.document {
            record.document = Some(document.clone());
        }
        if let Some(ref metadata) = self.metadata {
            let stored = record.metadata.get_or_insert_with(HashMap::new);
            for (k, v) in metadata {
                stored.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(
            MetadataValue::from_json(&json!(3)),
            Some(MetadataValue::Int(3))
        );
        assert_eq!(
            MetadataValue::from_json(&json!(2.5)),
            Some(MetadataValue::Float(2.5))
        );
        assert_eq!(
            MetadataValue::from_json(&json!("red")),
            Some(MetadataValue::Str("red".into()))
        );
        assert_eq!(
            MetadataValue::from_json(&json!(false)),
            Some(MetadataValue::Bool(false))
        );
        assert_eq!(MetadataValue::from_json(&json!(null)), None);
        assert_eq!(MetadataValue::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn test_metadata_from_json_rejects_nested() {
        let obj = json!({"ok": 1, "bad": {"x": 1}});
        let err = metadata_from_json(obj.as_object().unwrap()).unwrap_err();
        assert!(err.contains("'bad'"), "{err}");
    }

    #[test]
    fn test_patch_merges_metadata() {
        let mut meta = Metadata::new();
        meta.insert("a".into(), 1i64.into());
        meta.insert("b".into(), "x".into());
        let mut record = Record::new("r1", vec![0.0, 1.0]).with_metadata(meta);

        let mut update = Metadata::new();
        update.insert("b".into(), "y".into());
        let patch = RecordPatch {
            embedding: Some(vec![2.0, 3.0]),
            document: Some("doc".into()),
            metadata: Some(update),
        };
        patch.apply_to(&mut record);

        assert_eq!(record.embedding, vec![2.0, 3.0]);
        assert_eq!(record.document.as_deref(), Some("doc"));
        assert_eq!(record.metadata_value("a"), Some(&MetadataValue::Int(1)));
        assert_eq!(
            record.metadata_value("b"),
            Some(&MetadataValue::Str("y".into()))
        );
    }

    #[test]
    fn test_empty_patch() {
        assert!(RecordPatch::default().is_empty());
    }
}
