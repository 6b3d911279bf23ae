//! Documents moving through the pipeline and the pages that carry them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Builds the correlation key for an (index, type, id) triple.
///
/// The same key is computed for outgoing bulk lines and for incoming bulk
/// result items, so it must stay a pure function of the three parts.
pub fn identity_key(index: &str, doc_type: &str, id: &str) -> String {
    [index, doc_type, id].join("|")
}

/// One document: its identity triple plus its `_source` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collection (index) name.
    #[serde(rename = "_index")]
    pub index: String,
    /// Sub-collection (mapping type). Empty on typeless stores.
    #[serde(rename = "_type", default, skip_serializing_if = "String::is_empty")]
    pub doc_type: String,
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Document payload.
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

/// Shape used to validate filter output before it becomes a [`Record`].
#[derive(Deserialize)]
struct RecordLine {
    #[serde(rename = "_index", default)]
    index: String,
    #[serde(rename = "_type", default)]
    doc_type: String,
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(rename = "_source", default)]
    source: Option<Map<String, Value>>,
}

impl Record {
    /// Creates a record from its parts.
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        source: Map<String, Value>,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            id: id.into(),
            source,
        }
    }

    /// Parses one serialized record line, rejecting lines without an
    /// `_index`, an `_id` or a `_source` object.
    pub fn from_line(line: &str) -> Result<Self> {
        let parsed: RecordLine = serde_json::from_str(line)
            .map_err(|e| Error::MalformedRecord(format!("{e}, input={line:?}")))?;

        if parsed.index.is_empty() || parsed.id.is_empty() {
            return Err(Error::MalformedRecord(format!(
                "_index, _id is empty, input={line:?}"
            )));
        }
        let source = parsed
            .source
            .ok_or_else(|| Error::MalformedRecord(format!("_source is empty, input={line:?}")))?;

        Ok(Self {
            index: parsed.index,
            doc_type: parsed.doc_type,
            id: parsed.id,
            source,
        })
    }

    /// Identity key of this record.
    pub fn identity(&self) -> String {
        identity_key(&self.index, &self.doc_type, &self.id)
    }

    /// Serializes the record to a single JSON line (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Adds every default whose field is missing. Returns whether anything was added.
    pub fn apply_defaults(&mut self, defaults: &Map<String, Value>) -> bool {
        let mut changed = false;
        for (field, value) in defaults {
            if !self.source.contains_key(field) {
                self.source.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Renders the action header and document lines for a bulk body.
    pub fn bulk_lines(&self) -> Result<String> {
        let header = BulkAction {
            index: BulkTarget {
                index: &self.index,
                doc_type: &self.doc_type,
                id: &self.id,
            },
        };

        let mut out = serde_json::to_string(&header)?;
        out.push('\n');
        out.push_str(&serde_json::to_string(&self.source)?);
        out.push('\n');
        Ok(out)
    }
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkTarget<'a>,
}

#[derive(Serialize)]
struct BulkTarget<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type", skip_serializing_if = "str::is_empty")]
    doc_type: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records in scan order.
    pub records: Vec<Record>,
    /// Continuation token returned with this page. Empty means none.
    pub scroll_id: String,
    /// Total-count estimate, present when the store reported one.
    pub total: Option<u64>,
}

impl Page {
    /// An empty page ends the scroll whatever its token says.
    pub fn has_more(&self) -> bool {
        !self.records.is_empty()
    }

    /// Number of records in the page.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the page carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
